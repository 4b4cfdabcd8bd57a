use std::collections::HashSet;

use super::metric::RequestMetric;

/// Static-asset extensions that are never worth a page-hit record.
pub const DEFAULT_EXCLUDED_EXTENSIONS: &[&str] =
    &["svg", "jpg", "jpeg", "gif", "png", "ico", "css", "js", "bmp"];

/// Extensions served by dynamic page handlers. These are always tracked,
/// so they can never enter an [`ExclusionSet`].
pub const DYNAMIC_EXTENSIONS: &[&str] = &["aspx", "asmx"];

/// Prefix the host uses for application-relative paths.
const APP_RELATIVE_PREFIX: &str = "~/";

const PATH_DELIMITERS: [char; 2] = ['/', '\\'];

// ─── ExclusionSet ────────────────────────────────────────────────

/// Case-insensitive set of file extensions whose requests are ignored.
///
/// Entries are stored lower-cased; lookups fold ASCII case.
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    extensions: HashSet<String>,
}

impl ExclusionSet {
    /// An empty set: nothing is excluded.
    pub fn empty() -> Self {
        Self {
            extensions: HashSet::new(),
        }
    }

    /// Build a set from arbitrary extensions. Dynamic page extensions are
    /// silently dropped.
    pub fn from_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::empty();
        for ext in extensions {
            set.insert(ext.as_ref());
        }
        set
    }

    /// Add an extension (a leading `.` is tolerated). Returns `false` when
    /// the extension was empty, dynamic, or already present.
    pub fn insert(&mut self, extension: &str) -> bool {
        let ext = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        if ext.is_empty() || DYNAMIC_EXTENSIONS.contains(&ext.as_str()) {
            return false;
        }
        self.extensions.insert(ext)
    }

    pub fn is_excluded(&self, extension: &str) -> bool {
        if extension.bytes().any(|b| b.is_ascii_uppercase()) {
            self.extensions.contains(&extension.to_ascii_lowercase())
        } else {
            self.extensions.contains(extension)
        }
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::from_extensions(DEFAULT_EXCLUDED_EXTENSIONS)
    }
}

// ─── PathClassifier ──────────────────────────────────────────────

/// Outcome of classifying one request path.
#[derive(Debug)]
pub enum Classification {
    /// Worth recording; timing starts from the metric's creation.
    Track(RequestMetric),
    /// Static asset or otherwise uninteresting: record nothing.
    Ignore,
}

impl Classification {
    pub fn into_metric(self) -> Option<RequestMetric> {
        match self {
            Self::Track(metric) => Some(metric),
            Self::Ignore => None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignore)
    }
}

/// Strip the host's `~/` app-relative prefix, if present.
pub fn normalize_path(raw_path: &str) -> &str {
    raw_path.strip_prefix(APP_RELATIVE_PREFIX).unwrap_or(raw_path)
}

/// Split a normalized path into its page name and candidate extension.
///
/// The extension separator is searched for only inside the final path
/// segment, so `/v1.2/Default` has no extension. A trailing `.` means no
/// extension and the whole segment is the page name.
///
/// ```
/// use rust_request_tracker::tracking::page_identity;
///
/// assert_eq!(page_identity("/Default.aspx"), ("Default", Some("aspx")));
/// assert_eq!(page_identity("/Default"), ("Default", None));
/// assert_eq!(page_identity("/"), ("", None));
/// ```
pub fn page_identity(path: &str) -> (&str, Option<&str>) {
    let file_start = path.rfind(PATH_DELIMITERS).map_or(0, |i| i + 1);
    let file_name = &path[file_start..];

    match file_name.rfind('.') {
        Some(dot) if dot + 1 < file_name.len() => {
            (&file_name[..dot], Some(&file_name[dot + 1..]))
        }
        _ => (file_name, None),
    }
}

/// Turn a raw app-relative path and query string into a page-hit metric,
/// or decide the request is not worth recording.
///
/// Never fails: odd input degrades to best-effort identity fields.
pub fn classify(
    raw_path: &str,
    query_string: &str,
    exclusions: &ExclusionSet,
) -> Classification {
    if raw_path.is_empty() {
        return Classification::Track(RequestMetric::new(
            String::new(),
            String::new(),
            query_string.to_owned(),
        ));
    }

    let path = normalize_path(raw_path);
    let (page_name, extension) = page_identity(path);

    if let Some(ext) = extension {
        if exclusions.is_excluded(ext) {
            return Classification::Ignore;
        }
    }

    Classification::Track(RequestMetric::new(
        page_name.to_owned(),
        path.to_owned(),
        query_string.to_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(path: &str, query: &str) -> RequestMetric {
        classify(path, query, &ExclusionSet::default())
            .into_metric()
            .expect("request should be tracked")
    }

    #[test]
    fn default_extensions_are_excluded_in_any_case() {
        let set = ExclusionSet::default();
        for ext in DEFAULT_EXCLUDED_EXTENSIONS {
            assert!(set.is_excluded(ext), "{ext} should be excluded");
            assert!(
                set.is_excluded(&ext.to_ascii_uppercase()),
                "{ext} upper-cased should be excluded"
            );
        }
        assert!(set.is_excluded("Png"));
    }

    #[test]
    fn dynamic_extensions_are_never_excluded() {
        let mut set = ExclusionSet::default();
        assert!(!set.insert("aspx"));
        assert!(!set.insert("ASMX"));
        assert!(!set.insert(".Aspx"));
        for ext in ["aspx", "ASPX", "asmx", "AsMx"] {
            assert!(!set.is_excluded(ext));
        }
    }

    #[test]
    fn insert_normalizes_and_rejects_duplicates() {
        let mut set = ExclusionSet::empty();
        assert!(set.insert(".WOFF2"));
        assert!(!set.insert("woff2"));
        assert!(!set.insert("  "));
        assert!(set.is_excluded("woff2"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn root_path_has_empty_page_name() {
        let metric = track("/", "");
        assert_eq!(metric.absolute_path(), "/");
        assert_eq!(metric.page_name(), "");
    }

    #[test]
    fn regular_path_drops_extension_from_page_name() {
        let metric = track("/Default.aspx", "");
        assert_eq!(metric.absolute_path(), "/Default.aspx");
        assert_eq!(metric.page_name(), "Default");
    }

    #[test]
    fn tilde_prefix_is_stripped_and_query_kept() {
        let metric = track("~/Default.aspx", "q=Why");
        assert_eq!(metric.absolute_path(), "Default.aspx");
        assert_eq!(metric.page_name(), "Default");
        assert_eq!(metric.query_string(), "q=Why");
    }

    #[test]
    fn excluded_extension_is_ignored() {
        assert!(classify("/favicon.ico", "", &ExclusionSet::default()).is_ignored());
        assert!(classify("~/content/Site.CSS", "", &ExclusionSet::default()).is_ignored());
        assert!(classify("/images/logo.svg", "", &ExclusionSet::default()).is_ignored());
    }

    // Regression: the name length used to be computed one short when the
    // segment had no extension, yielding "Defaul".
    #[test]
    fn extensionless_path_keeps_full_segment() {
        let metric = track("/Default", "");
        assert_eq!(metric.absolute_path(), "/Default");
        assert_eq!(metric.page_name(), "Default");
    }

    #[test]
    fn dot_in_directory_is_not_an_extension() {
        let metric = track("/v1.2/orders", "");
        assert_eq!(metric.page_name(), "orders");

        let metric = track("/static.js/Checkout", "");
        assert_eq!(metric.page_name(), "Checkout");
    }

    #[test]
    fn last_dot_in_segment_is_the_separator() {
        assert!(classify("/scripts/jquery.min.js", "", &ExclusionSet::default()).is_ignored());

        let metric = track("/reports/2024.q1.aspx", "");
        assert_eq!(metric.page_name(), "2024.q1");
    }

    #[test]
    fn backslash_is_a_delimiter() {
        let metric = track("~/admin\\Users.aspx", "");
        assert_eq!(metric.absolute_path(), "admin\\Users.aspx");
        assert_eq!(metric.page_name(), "Users");
    }

    #[test]
    fn trailing_dot_keeps_whole_segment() {
        let metric = track("/Default.", "");
        assert_eq!(metric.page_name(), "Default.");
    }

    #[test]
    fn leading_dot_yields_empty_page_name() {
        let metric = track("/.profile", "");
        assert_eq!(metric.page_name(), "");
        assert_eq!(metric.absolute_path(), "/.profile");
    }

    #[test]
    fn empty_path_is_still_recorded() {
        let metric = track("", "a=1");
        assert_eq!(metric.absolute_path(), "");
        assert_eq!(metric.page_name(), "");
    }

    #[test]
    fn non_ascii_segments_do_not_panic() {
        let metric = track("/café/naïve.aspx", "");
        assert_eq!(metric.page_name(), "naïve");
        let metric = track("/日本/ページ", "");
        assert_eq!(metric.page_name(), "ページ");
    }

    #[test]
    fn empty_set_tracks_static_assets() {
        let metric = classify("/favicon.ico", "", &ExclusionSet::empty()).into_metric();
        assert_eq!(metric.map(|m| m.page_name().to_owned()), Some("favicon".into()));
    }
}
