use std::path::Path;

use chrono::{DateTime, NaiveDate};

use crate::util::{format_cents, slugify};

/// Owner attributes that go into an object's human-readable name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameParts {
    pub label: String,
    pub amount: String,
    pub date: String,
}

impl NameParts {
    pub fn for_contribution(member_name: &str, amount_cents: i64, date: NaiveDate) -> Self {
        Self {
            label: slug_or(member_name, "member"),
            amount: slug_or(&format_cents(amount_cents), "amount"),
            date: slug_or(&date.format("%Y-%m-%d").to_string(), "date"),
        }
    }

    pub fn for_cause(title: &str, amount_cents: Option<i64>, created_at: i64) -> Self {
        let amount = amount_cents.map_or_else(|| "na".to_string(), format_cents);
        let date = DateTime::from_timestamp(created_at, 0)
            .map_or_else(|| "unknown-date".to_string(), |d| d.format("%Y-%m-%d").to_string());
        Self {
            label: slug_or(title, "cause"),
            amount: slug_or(&amount, "amount"),
            date: slug_or(&date, "date"),
        }
    }

    pub fn base_name(&self) -> String {
        format!("{}-{}-{}", self.label, self.amount, self.date)
    }
}

fn slug_or(value: &str, fallback: &str) -> String {
    let slug = slugify(value);
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/webp" => Some(".webp"),
        "image/gif" => Some(".gif"),
        "image/bmp" => Some(".bmp"),
        "image/tiff" => Some(".tif"),
        _ => None,
    }
}

/// Lower-cased extension of the uploaded name, else one derived from the MIME type.
pub fn file_extension(original_name: &str, mime_type: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .or_else(|| extension_for_mime(mime_type).map(str::to_string))
        .unwrap_or_default()
}

/// `index` is zero-based; the suffix is only added when `total > 1`.
pub fn file_name(base: &str, original_name: &str, mime_type: &str, index: usize, total: usize) -> String {
    let suffix = if total > 1 { format!("-{}", index + 1) } else { String::new() };
    format!("{base}{suffix}{}", file_extension(original_name, mime_type))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn contribution_names() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let parts = NameParts::for_contribution("Jane  Doe", 15000, date);
        assert_eq!(parts.base_name(), "jane-doe-150-00-2024-03-09");
        assert_eq!(
            file_name(&parts.base_name(), "Receipt.JPG", "image/jpeg", 1, 3),
            "jane-doe-150-00-2024-03-09-2.jpg"
        );
    }

    #[test]
    fn cause_names_fall_back() {
        let parts = NameParts::for_cause("!!!", None, 0);
        assert_eq!(parts.base_name(), "cause-na-1970-01-01");
    }

    #[test]
    fn single_file_has_no_suffix() {
        assert_eq!(file_name("x", "photo", "image/webp", 0, 1), "x.webp");
        assert_eq!(file_name("x", "photo", "image/x-icon", 0, 1), "x");
    }
}
