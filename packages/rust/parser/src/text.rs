//! Text accumulation, entity resolution, and word counting.

/// Character data collected between element boundaries.
///
/// Raw text (including resolved references and CDATA) accumulates in a
/// pending run; each boundary flushes the run as one trimmed fragment.
#[derive(Debug, Default)]
pub(crate) struct TextRun {
    pending: String,
    fragments: Vec<String>,
}

impl TextRun {
    /// Append raw character data to the pending run.
    pub(crate) fn push(&mut self, raw: &str) {
        self.pending.push_str(raw);
    }

    /// Close the pending run at an element boundary.
    pub(crate) fn flush(&mut self) {
        let trimmed = self.pending.trim();
        if !trimmed.is_empty() {
            self.fragments.push(trimmed.to_string());
        }
        self.pending.clear();
    }

    /// Append fragments produced by a nested element, in document order.
    pub(crate) fn extend(&mut self, fragments: Vec<String>) {
        self.flush();
        self.fragments.extend(fragments);
    }

    /// Flush and hand back every fragment.
    pub(crate) fn finish(mut self) -> Vec<String> {
        self.flush();
        self.fragments
    }
}

/// Join fragments with single spaces and collapse interior whitespace.
/// Whitespace-only input yields `None`.
pub fn normalize_text<S: AsRef<str>>(fragments: &[S]) -> Option<String> {
    let collapsed = fragments
        .iter()
        .flat_map(|f| f.as_ref().split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Count whitespace-delimited tokens.
pub fn count_words(text: Option<&str>) -> usize {
    text.map_or(0, |t| t.split_whitespace().count())
}

/// Resolve a predefined entity or character reference name (without `&`/`;`).
pub(crate) fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    let code = if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };

    code.and_then(char::from_u32).map(|c| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_run_trims_each_fragment() {
        let mut run = TextRun::default();
        run.push("  Lorem ");
        run.flush();
        run.push("\n\t ");
        run.flush();
        run.push("ipsum");
        run.push(" & ");
        run.push("dolor ");
        assert_eq!(run.finish(), vec!["Lorem", "ipsum & dolor"]);
    }

    #[test]
    fn normalize_collapses_whitespace() {
        let fragments = ["a  b", "c\n\nd"];
        assert_eq!(normalize_text(&fragments).as_deref(), Some("a b c d"));
        assert_eq!(normalize_text(&["  ", "\n"]), None);
        assert_eq!(normalize_text::<&str>(&[]), None);
    }

    #[test]
    fn word_counting() {
        assert_eq!(count_words(Some("Lorem ipsum dolor")), 3);
        assert_eq!(count_words(Some("")), 0);
        assert_eq!(count_words(None), 0);
    }

    #[test]
    fn entities_resolve() {
        assert_eq!(resolve_entity("amp").as_deref(), Some("&"));
        assert_eq!(resolve_entity("#167").as_deref(), Some("§"));
        assert_eq!(resolve_entity("#x2014").as_deref(), Some("—"));
        assert_eq!(resolve_entity("nbsp"), None);
    }
}
