//! String normalization shared by the workflow jobs.

/// Normalizes a phone number for the engagement platform: strips every
/// non-digit character and prefixes the `57` country code to 10-digit
/// mobile numbers (those starting with `3`). Anything else passes through
/// stripped.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 && digits.starts_with('3') {
        format!("57{digits}")
    } else {
        digits
    }
}

/// Title-cases a name ("MARIA lopez" -> "Maria Lopez").
pub fn capitalize_words(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extracts the city from a branch name like "Bienco Pereira".
pub fn city_from_branch_name(branch: &str) -> Option<String> {
    let mut parts = branch.split_whitespace();
    parts.next()?;
    let city = parts.next()?;
    Some(city.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_number_gets_country_prefix() {
        assert_eq!(normalize_phone("3001234567"), "573001234567");
    }

    #[test]
    fn formatted_mobile_number_is_stripped_then_prefixed() {
        assert_eq!(normalize_phone("300 123-4567"), "573001234567");
    }

    #[test]
    fn already_prefixed_number_passes_through() {
        assert_eq!(normalize_phone("+57 300 1234567"), "573001234567");
    }

    #[test]
    fn landline_passes_through_stripped() {
        assert_eq!(normalize_phone("(604) 444-5566"), "6044445566");
    }

    #[test]
    fn empty_phone_stays_empty() {
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn capitalizes_each_word() {
        assert_eq!(capitalize_words("juan PEREZ gomez"), "Juan Perez Gomez");
        assert_eq!(capitalize_words("  maria  "), "Maria");
        assert_eq!(capitalize_words(""), "");
    }

    #[test]
    fn city_extraction() {
        assert_eq!(city_from_branch_name("Bienco Pereira"), Some("Pereira".into()));
        assert_eq!(city_from_branch_name("Bienco"), None);
        assert_eq!(city_from_branch_name(""), None);
    }
}
