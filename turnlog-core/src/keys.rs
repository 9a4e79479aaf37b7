//! Key derivation for posted turns
//!
//! Turns identify their lesson and student loosely: lesson ids are often the
//! URL of the lesson page, and user ids may carry a location and class prefix
//! (`location-class-user`). This module turns those raw ids into the natural
//! keys of the aggregate documents.

use url::Url;

/// Normalized keys for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    /// Extracted, case-folded lesson key
    pub lesson_key: String,
    /// Case-folded user key (without location/class prefix)
    pub user_key: String,
    /// Location prefix, when the user id had one
    pub location_key: Option<String>,
    /// Class prefix, when the user id had one
    pub class_key: Option<String>,
    /// `user_key:lesson_key`
    pub session_key: String,
    /// The posted lesson id when it differed from the extracted key
    pub lesson_url_seen: Option<String>,
}

impl DerivedKeys {
    /// Derive keys from raw ids.
    ///
    /// Callers must reject blank ids before getting here.
    pub fn derive(lesson_raw: &str, user_raw: &str) -> Self {
        let full_lesson = lesson_raw.to_lowercase();
        let full_user = user_raw.to_lowercase();

        let lesson_key = extract_lesson_key(&full_lesson);
        let lesson_url_seen = (lesson_key != full_lesson).then(|| full_lesson.clone());

        let (location_key, class_key, user_key) = split_user_id(&full_user);
        let session_key = session_key(&user_key, &lesson_key);

        Self {
            lesson_key,
            user_key,
            location_key,
            class_key,
            session_key,
            lesson_url_seen,
        }
    }

    /// Class key when present and not blank
    pub fn class(&self) -> Option<&str> {
        self.class_key
            .as_deref()
            .filter(|class| !class.trim().is_empty())
    }
}

/// Composite key of a session document.
pub fn session_key(user_key: &str, lesson_key: &str) -> String {
    format!("{}:{}", user_key, lesson_key)
}

/// Extract the lesson id from a lesson URL.
///
/// Only absolute `http`/`https` URLs whose decoded path contains `/lesson`
/// are considered. The first path segment that starts with `lesson` (any
/// case) wins, skipping the first and last segments. Anything else, including
/// a URL that fails to parse, returns the input unchanged.
pub fn extract_lesson_key(full_lesson_id: &str) -> String {
    if full_lesson_id.trim().is_empty() {
        return full_lesson_id.to_string();
    }

    lesson_segment(full_lesson_id).unwrap_or_else(|| full_lesson_id.to_string())
}

fn lesson_segment(full_lesson_id: &str) -> Option<String> {
    let url = Url::parse(full_lesson_id).ok()?;
    if !url.scheme().starts_with("http") {
        return None;
    }

    let path = urlencoding::decode(url.path()).ok()?;
    if !path.to_lowercase().contains("/lesson") {
        return None;
    }

    // The lesson is never the first or last element of the path
    let components: Vec<&str> = path.split('/').collect();
    if components.len() < 3 {
        return None;
    }

    components[1..components.len() - 1]
        .iter()
        .find(|one| one.to_lowercase().starts_with("lesson"))
        .map(|one| one.to_string())
}

/// Split `location-class-user` ids; anything with fewer than three dash
/// fields is a plain user id. Dashes inside the user part are kept.
pub fn split_user_id(full_user_id: &str) -> (Option<String>, Option<String>, String) {
    let fields: Vec<&str> = full_user_id.split('-').collect();
    if fields.len() > 2 {
        (
            Some(fields[0].trim().to_string()),
            Some(fields[1].trim().to_string()),
            fields[2..].join("-"),
        )
    } else {
        (None, None, full_user_id.to_string())
    }
}
