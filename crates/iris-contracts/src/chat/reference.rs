use std::ops::Range;
use std::path::{Path, PathBuf};

use url::Url;

/// Inline marker that names an image inside free-form prompt text.
pub const IMAGE_MARKER_PREFIX: &str = "#image:";

/// Extensions accepted from pickers and used for mime sniffing.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

const STRUCTURED_IMAGE_VARIABLE_PREFIX: &str = "image";

/// Variable resolved by the host and bound to a region of the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptVariable {
    pub name: String,
    /// Character offsets into the prompt, end exclusive.
    pub span: Range<usize>,
    pub value: String,
}

impl PromptVariable {
    pub fn new(name: impl Into<String>, span: Range<usize>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            span,
            value: value.into(),
        }
    }

    fn names_image(&self) -> bool {
        self.name.starts_with(STRUCTURED_IMAGE_VARIABLE_PREFIX)
    }
}

/// Where the image path of a prompt came from. Spans are byte ranges of the
/// raw prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Structured { path: PathBuf, span: Range<usize> },
    TextMarker { path: PathBuf, span: Range<usize> },
    None,
}

impl ImageReference {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Structured { path, .. } | Self::TextMarker { path, .. } => Some(path),
            Self::None => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Structured { .. } => "structured",
            Self::TextMarker { .. } => "text_marker",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptReference {
    pub raw_prompt: String,
    pub reference: ImageReference,
    pub cleaned_prompt: String,
}

impl PromptReference {
    pub fn image_path(&self) -> Option<&Path> {
        self.reference.path()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    /// Byte range of the whole marker, prefix included.
    pub span: Range<usize>,
    pub token: String,
}

/// Resolves the image a prompt refers to.
///
/// Precedence is fixed: a host-supplied variable whose name starts with
/// `image` wins, then the first `#image:` marker in the text, then nothing.
/// Only the first marker is consumed; any later marker stays in the cleaned
/// prompt verbatim.
pub fn resolve_prompt_reference(
    prompt: &str,
    variables: &[PromptVariable],
    workspace_roots: &[PathBuf],
) -> PromptReference {
    if let Some(variable) = variables.iter().find(|variable| variable.names_image()) {
        let span = char_span_to_byte_range(prompt, &variable.span);
        return PromptReference {
            raw_prompt: prompt.to_string(),
            cleaned_prompt: remove_range(prompt, &span),
            reference: ImageReference::Structured {
                path: PathBuf::from(&variable.value),
                span,
            },
        };
    }

    if let Some(marker) = find_image_marker(prompt) {
        let path = resolve_against_roots(decode_marker_token(&marker.token), workspace_roots);
        return PromptReference {
            raw_prompt: prompt.to_string(),
            cleaned_prompt: remove_range(prompt, &marker.span),
            reference: ImageReference::TextMarker {
                path,
                span: marker.span,
            },
        };
    }

    PromptReference {
        raw_prompt: prompt.to_string(),
        reference: ImageReference::None,
        cleaned_prompt: prompt.to_string(),
    }
}

/// Finds the first `#image:<token>` where the token is a non-empty run of
/// non-whitespace characters (Unicode `White_Space`).
pub fn find_image_marker(prompt: &str) -> Option<MarkerMatch> {
    let mut cursor = 0;
    while let Some(offset) = prompt[cursor..].find(IMAGE_MARKER_PREFIX) {
        let start = cursor + offset;
        let token_start = start + IMAGE_MARKER_PREFIX.len();
        let tail = &prompt[token_start..];
        let token_len = tail
            .char_indices()
            .find(|(_, ch)| ch.is_whitespace())
            .map(|(idx, _)| idx)
            .unwrap_or(tail.len());
        if token_len > 0 {
            return Some(MarkerMatch {
                span: start..token_start + token_len,
                token: tail[..token_len].to_string(),
            });
        }
        cursor = token_start;
    }
    None
}

/// Renders the marker that resolves back to `path`. Paths containing
/// whitespace are written as `file://` URLs, which needs an absolute path.
pub fn image_marker(path: &Path) -> Option<String> {
    let text = path.to_string_lossy();
    if text.is_empty() {
        return None;
    }
    if !text.chars().any(char::is_whitespace) {
        return Some(format!("{IMAGE_MARKER_PREFIX}{text}"));
    }
    Url::from_file_path(path)
        .ok()
        .map(|url| format!("{IMAGE_MARKER_PREFIX}{url}"))
}

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

fn decode_marker_token(token: &str) -> PathBuf {
    if token.starts_with("file:") {
        if let Some(path) = Url::parse(token)
            .ok()
            .filter(|url| url.scheme() == "file")
            .and_then(|url| url.to_file_path().ok())
        {
            return path;
        }
    }
    PathBuf::from(token)
}

fn resolve_against_roots(path: PathBuf, workspace_roots: &[PathBuf]) -> PathBuf {
    match workspace_roots.first() {
        Some(root) if path.is_relative() => root.join(path),
        _ => path,
    }
}

fn char_span_to_byte_range(text: &str, span: &Range<usize>) -> Range<usize> {
    let byte_at = |char_idx: usize| {
        text.char_indices()
            .nth(char_idx)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len())
    };
    let start = byte_at(span.start);
    let end = byte_at(span.end).max(start);
    start..end
}

fn remove_range(text: &str, range: &Range<usize>) -> String {
    let mut out = String::with_capacity(text.len() - (range.end - range.start));
    out.push_str(&text[..range.start]);
    out.push_str(&text[range.end..]);
    out
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn structured_variable_wins_and_its_span_is_removed() {
        let prompt = "explain #file:shot.png please #image:/tmp/ignored.png";
        let variables = vec![PromptVariable::new("image", 8..22, "/work/shot.png")];

        let resolved = resolve_prompt_reference(prompt, &variables, &[]);

        assert_eq!(resolved.image_path(), Some(Path::new("/work/shot.png")));
        assert_eq!(
            resolved.cleaned_prompt,
            "explain  please #image:/tmp/ignored.png"
        );
        assert_eq!(resolved.reference.kind(), "structured");
    }

    #[test]
    fn structured_span_counts_characters_not_bytes() {
        let prompt = "¿qué es [ref] esto?";
        let variables = vec![PromptVariable::new("image:1", 8..13, "/a.png")];

        let resolved = resolve_prompt_reference(prompt, &variables, &[]);

        assert_eq!(resolved.cleaned_prompt, "¿qué es  esto?");
    }

    #[test]
    fn inverted_or_overlong_spans_are_clamped() {
        let variables = vec![PromptVariable::new("image", 4..2, "/a.png")];
        let resolved = resolve_prompt_reference("abcdef", &variables, &[]);
        assert_eq!(resolved.cleaned_prompt, "abcdef");

        let variables = vec![PromptVariable::new("image", 3..99, "/a.png")];
        let resolved = resolve_prompt_reference("abcdef", &variables, &[]);
        assert_eq!(resolved.cleaned_prompt, "abc");
    }

    #[test]
    fn variables_without_image_prefix_are_ignored() {
        let variables = vec![PromptVariable::new("file", 0..3, "/a.png")];
        let resolved = resolve_prompt_reference("abc", &variables, &[]);
        assert_eq!(resolved.reference, ImageReference::None);
        assert_eq!(resolved.cleaned_prompt, "abc");
    }

    #[test]
    fn single_marker_is_extracted_and_removed() {
        let prompt = "what is in #image:/tmp/cat.png this picture?";

        let resolved = resolve_prompt_reference(prompt, &[], &[]);

        assert_eq!(resolved.image_path(), Some(Path::new("/tmp/cat.png")));
        assert_eq!(resolved.cleaned_prompt, "what is in  this picture?");
        assert_eq!(
            resolved.reference,
            ImageReference::TextMarker {
                path: PathBuf::from("/tmp/cat.png"),
                span: 11..30,
            }
        );
    }

    #[test]
    fn relative_marker_resolves_against_first_root() {
        let roots = vec![PathBuf::from("/repo"), PathBuf::from("/other")];

        let resolved = resolve_prompt_reference("#image:docs/ui.png fix it", &[], &roots);

        assert_eq!(resolved.image_path(), Some(Path::new("/repo/docs/ui.png")));
        assert_eq!(resolved.cleaned_prompt, " fix it");
    }

    #[test]
    fn relative_marker_without_roots_stays_relative() {
        let resolved = resolve_prompt_reference("see #image:ui.png", &[], &[]);
        assert_eq!(resolved.image_path(), Some(Path::new("ui.png")));
    }

    #[test]
    fn only_first_marker_is_honored() {
        let resolved = resolve_prompt_reference("#image:/a.png vs #image:/b.png", &[], &[]);

        assert_eq!(resolved.image_path(), Some(Path::new("/a.png")));
        assert_eq!(resolved.cleaned_prompt, " vs #image:/b.png");
    }

    #[test]
    fn empty_marker_token_is_skipped() {
        let resolved = resolve_prompt_reference("#image: then #image:/b.png", &[], &[]);

        assert_eq!(resolved.image_path(), Some(Path::new("/b.png")));
        assert_eq!(resolved.cleaned_prompt, "#image: then ");
    }

    #[test]
    fn marker_token_stops_at_unicode_whitespace() {
        let marker = find_image_marker("#image:/a.png\u{3000}rest").unwrap();
        assert_eq!(marker.token, "/a.png");
    }

    #[test]
    fn prompt_without_reference_is_unchanged() {
        let resolved = resolve_prompt_reference("describe the chart", &[], &[]);
        assert_eq!(resolved.reference, ImageReference::None);
        assert_eq!(resolved.cleaned_prompt, "describe the chart");
        assert_eq!(resolved.raw_prompt, "describe the chart");
    }

    #[cfg(unix)]
    #[test]
    fn file_url_markers_are_decoded() {
        let resolved =
            resolve_prompt_reference("#image:file:///tmp/my%20shots/a.png why", &[], &[]);
        assert_eq!(resolved.image_path(), Some(Path::new("/tmp/my shots/a.png")));
        assert_eq!(resolved.cleaned_prompt, " why");
    }

    #[cfg(unix)]
    #[test]
    fn rendered_markers_round_trip_through_the_resolver() {
        for path in ["/tmp/plain.png", "/tmp/with space/shot.jpg"] {
            let marker = image_marker(Path::new(path)).unwrap();
            let resolved = resolve_prompt_reference(&format!("{marker} again"), &[], &[]);
            assert_eq!(resolved.image_path(), Some(Path::new(path)));
            assert_eq!(resolved.cleaned_prompt, " again");
        }
    }

    #[test]
    fn relative_paths_with_whitespace_have_no_marker() {
        assert_eq!(image_marker(Path::new("my shot.png")), None);
        assert_eq!(
            image_marker(Path::new("shot.png")),
            Some("#image:shot.png".to_string())
        );
    }

    #[test]
    fn image_extension_filter_is_case_insensitive() {
        assert!(is_image_path(Path::new("/a/b.PNG")));
        assert!(is_image_path(Path::new("c.jpeg")));
        assert!(!is_image_path(Path::new("c.gif")));
        assert!(!is_image_path(Path::new("noext")));
    }
}
