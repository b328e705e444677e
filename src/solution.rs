//! Repository layout for saved solutions.
//!
//! Solutions are grouped into one folder per Monday-to-Sunday week:
//!
//! ```text
//! <DD-MM-YYYY>_to_<DD-MM-YYYY>/<DD-MM-YYYY>__<id>. <Title>.<ext>
//! ```
//!
//! The folder is placed under `target.path_prefix` by the caller.

use chrono::{Datelike, Duration, NaiveDate};

use crate::repo::InputError;

/// Titles longer than this are cut.
const MAX_TITLE_CHARS: usize = 60;

/// Used when the language is missing or unrecognized.
pub const FALLBACK_EXTENSION: &str = "txt";

/// Short names and bare extensions, too short to match as substrings.
const EXACT_LANGUAGES: &[(&str, &str)] = &[
    ("c", "c"),
    ("cs", "cs"),
    ("go", "go"),
    ("js", "js"),
    ("kt", "kt"),
    ("py", "py"),
    ("rb", "rb"),
    ("rs", "rs"),
    ("ts", "ts"),
];

/// Checked in order, so `javascript` is tried before `java`.
const LANGUAGE_FRAGMENTS: &[(&str, &str)] = &[
    ("typescript", "ts"),
    ("javascript", "js"),
    ("node", "js"),
    ("python", "py"),
    ("cpp", "cpp"),
    ("c++", "cpp"),
    ("c#", "cs"),
    ("csharp", "cs"),
    ("java", "java"),
    ("kotlin", "kt"),
    ("rust", "rs"),
    ("ruby", "rb"),
    ("swift", "swift"),
    ("scala", "scala"),
    ("golang", "go"),
    ("php", "php"),
];

/// File extension for an editor language name such as `Python3` or `C++`.
pub fn extension_for(language: &str) -> Option<&'static str> {
    let language = language.trim().to_ascii_lowercase();
    if language.is_empty() {
        return None;
    }
    EXACT_LANGUAGES
        .iter()
        .find(|(name, _)| *name == language)
        .or_else(|| {
            LANGUAGE_FRAGMENTS
                .iter()
                .find(|(fragment, _)| language.contains(fragment))
        })
        .map(|(_, ext)| *ext)
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn day_stamp(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

/// `DD-MM-YYYY_to_DD-MM-YYYY` for the Monday-to-Sunday week holding `date`.
pub fn week_folder(date: NaiveDate) -> String {
    let start = week_start(date);
    let end = start + Duration::days(6);
    format!("{}_to_{}", day_stamp(start), day_stamp(end))
}

/// Keep ASCII letters, digits, dots and dashes; collapse whitespace runs.
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(*c, '.' | '-'))
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn escapes_folder(part: &str) -> bool {
    part.trim().is_empty() || part.contains('/') || part.contains('\\')
}

/// The problem a solution belongs to.
#[derive(Debug, Clone, Default)]
pub struct Problem {
    /// URL slug, e.g. `two-sum`.
    pub slug: String,
    /// Numeric id shown before the title; the slug stands in when absent.
    pub question_id: Option<String>,
    pub title: Option<String>,
    /// Editor language, mapped through [`extension_for`].
    pub language: Option<String>,
}

impl Problem {
    fn check(&self) -> Result<(), InputError> {
        if escapes_folder(&self.slug) {
            return Err(InputError::InvalidProblem(self.slug.clone()));
        }
        if let Some(id) = self.question_id.as_deref().filter(|id| escapes_folder(id)) {
            return Err(InputError::InvalidProblem(id.to_string()));
        }
        Ok(())
    }

    fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.slug.trim())
    }

    pub fn extension(&self) -> &'static str {
        self.language
            .as_deref()
            .and_then(extension_for)
            .unwrap_or(FALLBACK_EXTENSION)
    }

    /// `DD-MM-YYYY__<id>. <Title>.<ext>` for a solution saved on `date`.
    pub fn file_name(&self, date: NaiveDate) -> Result<String, InputError> {
        self.check()?;
        let id = self
            .question_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.slug.trim());
        let mut title = sanitize_title(self.display_title());
        if title.is_empty() {
            title = sanitize_title(&self.slug);
        }
        Ok(format!(
            "{}__{id}. {title}.{}",
            day_stamp(date),
            self.extension()
        ))
    }

    /// Week folder and file name, relative to the path prefix.
    pub fn relative_path(&self, date: NaiveDate) -> Result<String, InputError> {
        Ok(format!("{}/{}", week_folder(date), self.file_name(date)?))
    }

    pub fn commit_message(&self) -> String {
        format!("Add solution for {}", self.display_title())
    }
}

/// Today's date on the local clock; week folders follow the saver's calendar.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
