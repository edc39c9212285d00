use serde::Serialize;

const FENCE: &str = "```";

/// Language tag that makes a lone fenced block previewable.
pub const PREVIEW_LANGUAGE: &str = "html";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub body: String,
}

/// Follow-up the host may offer once an answer has finished streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FollowUpAction {
    PreviewHtml { body: String },
}

impl FollowUpAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PreviewHtml { .. } => "preview-html",
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Self::PreviewHtml { body } => body,
        }
    }
}

/// Splits `text` into fenced regions, pairing each opening fence with the
/// next fence after it. An opening fence without a partner is not a region.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut cursor = 0;
    while let Some(open) = text[cursor..].find(FENCE) {
        let inner_start = cursor + open + FENCE.len();
        let Some(close) = text[inner_start..].find(FENCE) else {
            break;
        };
        let inner_end = inner_start + close;
        blocks.push(parse_region(&text[inner_start..inner_end]));
        cursor = inner_end + FENCE.len();
    }
    blocks
}

/// Offers a preview only when the whole answer holds exactly one fenced
/// region and that region is tagged `html`.
pub fn preview_action(text: &str) -> Option<FollowUpAction> {
    let mut blocks = extract_code_blocks(text);
    if blocks.len() != 1 {
        return None;
    }
    let block = blocks.remove(0);
    if block.language.as_deref() != Some(PREVIEW_LANGUAGE) {
        return None;
    }
    Some(FollowUpAction::PreviewHtml { body: block.body })
}

fn parse_region(inner: &str) -> CodeBlock {
    let tag_len = inner
        .find(|ch: char| ch.is_whitespace() || ch == '`')
        .unwrap_or(inner.len());
    let language = (tag_len > 0).then(|| inner[..tag_len].to_string());

    let body = match inner.find('\n') {
        Some(newline) => {
            let rest = &inner[newline + 1..];
            // The closing fence line may be indented.
            let rest = match rest.rfind('\n') {
                Some(last) if rest[last + 1..].trim().is_empty() => &rest[..last],
                _ => rest,
            };
            rest.strip_suffix('\r').unwrap_or(rest)
        }
        None => "",
    };

    CodeBlock {
        language,
        body: body.to_string(),
    }
}
