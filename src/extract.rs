use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref URL_PATTERN: Regex = Regex::new(r"https?://\S+").expect("url pattern is valid");
}

const INLINE_SPACE: [char; 2] = [' ', '\t'];

/// Notification body split into prose and the links embedded in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedContent {
    pub text: String,
    pub links: Vec<String>,
}

/// Pulls every `http(s)://` link out of `body`, in order of appearance, and
/// returns the remaining text with the gaps closed up.
pub fn extract(body: Option<&str>) -> ExtractedContent {
    let Some(body) = body else {
        return ExtractedContent::default();
    };

    let links: Vec<String> = URL_PATTERN
        .find_iter(body)
        .map(|m| m.as_str().to_string())
        .collect();

    let mut text = String::with_capacity(body.len());
    for (index, segment) in URL_PATTERN.split(body).enumerate() {
        if index == 0 {
            text.push_str(segment);
            continue;
        }
        // Close the gap left by a removed link; line breaks are kept.
        let head = segment.trim_start_matches(INLINE_SPACE);
        text.truncate(text.trim_end_matches(INLINE_SPACE).len());
        if !text.is_empty()
            && !text.ends_with('\n')
            && !head.is_empty()
            && !head.starts_with(['\r', '\n'])
        {
            text.push(' ');
        }
        text.push_str(head);
    }

    ExtractedContent {
        text: text.trim().to_string(),
        links,
    }
}
