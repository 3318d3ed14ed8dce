// src/exec/template.rs

//! Source locator templating against the run's logical date.
//!
//! Supported placeholders:
//! - `{year}`, `{month}`, `{day}`, `{hour}` (unpadded integers), also spelled
//!   `{execution_date.year}` etc.
//! - `{ds}` (`YYYY-MM-DD`) and `{ds_nodash}` (`YYYYMMDD`).

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::{Captures, Regex};
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("placeholder pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{placeholder}}}' in '{template}'")]
    UnknownPlaceholder {
        placeholder: String,
        template: String,
    },
}

/// Substitute every placeholder in `template`.
pub fn render_source(template: &str, logical_date: &DateTime<Utc>) -> Result<String, TemplateError> {
    let mut unknown: Option<String> = None;

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        match resolve(key, logical_date) {
            Some(value) => value,
            None => {
                unknown.get_or_insert_with(|| key.to_string());
                caps[0].to_string()
            }
        }
    });

    match unknown {
        Some(placeholder) => Err(TemplateError::UnknownPlaceholder {
            placeholder,
            template: template.to_string(),
        }),
        None => Ok(rendered.into_owned()),
    }
}

fn resolve(key: &str, date: &DateTime<Utc>) -> Option<String> {
    let key = key.strip_prefix("execution_date.").unwrap_or(key);
    let value = match key {
        "year" => date.year().to_string(),
        "month" => date.month().to_string(),
        "day" => date.day().to_string(),
        "hour" => date.hour().to_string(),
        "ds" => date.format("%Y-%m-%d").to_string(),
        "ds_nodash" => date.format("%Y%m%d").to_string(),
        _ => return None,
    };
    Some(value)
}
