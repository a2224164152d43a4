use futures::{Stream, StreamExt};

use crate::speech::RecognitionEvent;

/// Accumulates dictated free text (plan intent)
#[derive(Debug, Clone, Default)]
pub struct FreeTextCapture {
    preview: String,
    text: String,
}

impl FreeTextCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from text the user already typed
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            preview: String::new(),
            text: text.into(),
        }
    }

    /// Latest interim rendering, replaced on every interim event
    pub fn preview(&self) -> &str {
        &self.preview
    }

    /// Accumulated final text
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn on_event(&mut self, event: &RecognitionEvent) {
        if !event.is_final {
            self.preview.clone_from(&event.text);
            return;
        }

        self.preview.clear();
        join_utterance(&mut self.text, &event.text);
    }

    /// Consume `events` until the stream ends
    pub async fn run<S>(&mut self, events: S, mut on_update: impl FnMut(&Self))
    where
        S: Stream<Item = RecognitionEvent>,
    {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            self.on_event(&event);
            on_update(self);
        }
    }
}

/// Append `next` to `acc`
///
/// A single space goes in when the next utterance starts with a non-CJK word
/// character and the text so far ends in one or in ASCII punctuation, so
/// `hello,` + `world` reads `hello, world` but `午饭` + `80元` stays `午饭80元`.
pub fn join_utterance(acc: &mut String, next: &str) {
    let next = next.trim();
    if next.is_empty() {
        return;
    }

    let needs_space = match (acc.chars().next_back(), next.chars().next()) {
        (Some(a), Some(b)) => {
            (is_spaced_word_char(a) || a.is_ascii_punctuation()) && is_spaced_word_char(b)
        }
        _ => false,
    };
    if needs_space {
        acc.push(' ');
    }
    acc.push_str(next);
}

fn is_spaced_word_char(c: char) -> bool {
    (c.is_alphanumeric() || c == '_') && !is_cjk(c)
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3000..=0x303F     // CJK symbols and punctuation
        | 0x3040..=0x30FF   // Hiragana, Katakana
        | 0x3400..=0x4DBF   // CJK extension A
        | 0x4E00..=0x9FFF   // CJK unified ideographs
        | 0xAC00..=0xD7AF   // Hangul syllables
        | 0xF900..=0xFAFF   // CJK compatibility ideographs
        | 0xFF00..=0xFFEF   // Halfwidth and fullwidth forms
        | 0x20000..=0x2FA1F // CJK extensions B and later
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(parts: &[&str]) -> String {
        let mut acc = String::new();
        for part in parts {
            join_utterance(&mut acc, part);
        }
        acc
    }

    #[test]
    fn test_latin_words_get_a_space() {
        assert_eq!(joined(&["three days", "in Tokyo"]), "three days in Tokyo");
    }

    #[test]
    fn test_cjk_is_concatenated() {
        assert_eq!(joined(&["我想去日本", "五天"]), "我想去日本五天");
        assert_eq!(joined(&["去Tokyo", "玩"]), "去Tokyo玩");
    }

    #[test]
    fn test_mixed_seam_without_space() {
        assert_eq!(joined(&["预算", "10000 yuan"]), "预算10000 yuan");
        assert_eq!(joined(&["去京都。", "Then"]), "去京都。Then");
        assert_eq!(joined(&["Kyoto,", "大阪"]), "Kyoto,大阪");
    }

    #[test]
    fn test_space_after_ascii_punctuation() {
        assert_eq!(joined(&["hello,", "world"]), "hello, world");
        assert_eq!(joined(&["Kyoto.", "Then Osaka"]), "Kyoto. Then Osaka");
        assert_eq!(joined(&["budget:", "500"]), "budget: 500");
        assert_eq!(joined(&["hello", "?"]), "hello?");
    }

    #[test]
    fn test_interim_replaces_preview_and_final_clears_it() {
        let mut capture = FreeTextCapture::new();
        capture.on_event(&RecognitionEvent::interim("我想"));
        capture.on_event(&RecognitionEvent::interim("我想去"));
        assert_eq!(capture.preview(), "我想去");
        assert_eq!(capture.text(), "");

        capture.on_event(&RecognitionEvent::final_("我想去京都"));
        assert_eq!(capture.preview(), "");
        assert_eq!(capture.text(), "我想去京都");
    }

    #[test]
    fn test_blank_final_is_ignored() {
        let mut capture = FreeTextCapture::with_text("Kyoto");
        capture.on_event(&RecognitionEvent::final_("   "));
        assert_eq!(capture.text(), "Kyoto");
    }
}
