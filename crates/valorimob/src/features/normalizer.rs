/// Canonical neighborhood / municipality key: invisible marks removed,
/// surrounding whitespace trimmed, lower-cased. Inner spacing is kept.
pub fn normalize_key(value: &str) -> String {
    value.replace(['\u{feff}', '\u{200b}'], "").trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bom_and_case() {
        assert_eq!(normalize_key("\u{feff}  Centro Histórico "), "centro histórico");
        assert_eq!(normalize_key("ROCIO"), "rocio");
    }

    #[test]
    fn keeps_inner_whitespace() {
        assert_eq!(normalize_key(" Vila  Nova\t"), "vila  nova");
    }

    #[test]
    fn blank_stays_blank() {
        assert_eq!(normalize_key(" \u{200b} "), "");
    }
}
