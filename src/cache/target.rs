//! Cache target derivation: where a page's artifact lives and whether it may exist.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use url::Url;

use crate::domain::pages::PageSnapshot;

/// File extension of every cached artifact.
pub const ARTIFACT_EXTENSION: &str = "html";
/// Label that keeps a page out of the mirror.
pub const DEFAULT_NOCACHE_LABEL: &str = "nocache";

/// Stable identity of a page's artifact: `(space key, title)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    pub space_key: String,
    pub title: String,
}

impl CacheKey {
    pub fn new(space_key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            space_key: space_key.into(),
            title: title.into(),
        }
    }

    pub fn of(page: &PageSnapshot) -> Self {
        Self::new(page.space_key.clone(), page.title.clone())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.space_key, self.title)
    }
}

/// Everything needed to regenerate or delete one page's artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTarget {
    pub key: CacheKey,
    pub source_url: String,
    /// Raw and `+`-for-space spellings; both are written and deleted together.
    pub output_paths: BTreeSet<PathBuf>,
    pub cacheable: bool,
}

impl CacheTarget {
    /// File names of the outputs that live directly inside `dir`.
    pub fn file_names_in<'a>(&'a self, dir: &'a Path) -> impl Iterator<Item = &'a OsStr> + 'a {
        self.output_paths
            .iter()
            .filter(move |path| path.parent() == Some(dir))
            .filter_map(|path| path.file_name())
    }
}

/// Filesystem and URL conventions of one configured mirror.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
    render_base: String,
    nocache_label: String,
}

impl CacheLayout {
    pub fn new(
        root: impl Into<PathBuf>,
        render_base_url: &Url,
        nocache_label: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            render_base: render_base_url.as_str().trim_end_matches('/').to_string(),
            nocache_label: nocache_label.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn nocache_label(&self) -> &str {
        &self.nocache_label
    }

    /// Directory holding the artifacts of one space.
    pub fn space_dir(&self, space_key: &str) -> PathBuf {
        confine(&self.root, &neutralize(space_key))
    }

    pub fn output_paths(&self, key: &CacheKey) -> BTreeSet<PathBuf> {
        let name = format!(
            "{}/{}.{ARTIFACT_EXTENSION}",
            neutralize(&key.space_key),
            neutralize(&key.title)
        );

        let mut paths = BTreeSet::new();
        paths.insert(confine(&self.root, &name));
        paths.insert(confine(&self.root, &name.replace(' ', "+")));
        paths
    }

    pub fn source_url(&self, page: &PageSnapshot) -> String {
        if page.url_path.starts_with('/') {
            format!("{}{}", self.render_base, page.url_path)
        } else {
            format!("{}/{}", self.render_base, page.url_path)
        }
    }

    pub fn target(&self, page: &PageSnapshot) -> CacheTarget {
        let key = CacheKey::of(page);
        CacheTarget {
            output_paths: self.output_paths(&key),
            source_url: self.source_url(page),
            cacheable: !page.has_label(&self.nocache_label),
            key,
        }
    }
}

fn neutralize(name: &str) -> String {
    name.replace("..", "_")
}

/// Join `relative` under `root`, keeping only normal components so the result
/// can never escape the root (absolute titles, drive prefixes, stray `..`).
fn confine(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> CacheLayout {
        let base = Url::parse("https://wiki.example.com/").expect("valid url");
        CacheLayout::new("/srv/mirror", &base, DEFAULT_NOCACHE_LABEL)
    }

    #[test]
    fn titles_with_spaces_get_both_spellings() {
        let target = layout().target(&PageSnapshot::new("DOC", "Foo Bar", "/display/DOC/Foo+Bar"));

        let expected: BTreeSet<PathBuf> = [
            PathBuf::from("/srv/mirror/DOC/Foo Bar.html"),
            PathBuf::from("/srv/mirror/DOC/Foo+Bar.html"),
        ]
        .into_iter()
        .collect();
        assert_eq!(target.output_paths, expected);
    }

    #[test]
    fn titles_without_spaces_have_a_single_path() {
        let target = layout().target(&PageSnapshot::new("DOC", "Home", "/display/DOC/Home"));
        assert_eq!(target.output_paths.len(), 1);
    }

    #[test]
    fn traversal_sequences_stay_under_root() {
        let layout = layout();
        for title in ["../../etc/passwd", "/etc/passwd", "..", "a/../../b"] {
            let target = layout.target(&PageSnapshot::new("DOC", title, "/x"));
            for path in &target.output_paths {
                assert!(path.starts_with("/srv/mirror/DOC"), "{title} escaped: {path:?}");
                assert!(
                    !path.components().any(|c| matches!(c, Component::ParentDir)),
                    "{title} kept a parent component: {path:?}"
                );
            }
        }

        let target = layout.target(&PageSnapshot::new("DOC", "../../etc/passwd", "/x"));
        assert!(
            target
                .output_paths
                .contains(Path::new("/srv/mirror/DOC/_/_/etc/passwd.html"))
        );
    }

    #[test]
    fn space_keys_are_neutralized_too() {
        let layout = layout();
        assert_eq!(layout.space_dir("../x"), PathBuf::from("/srv/mirror/_/x"));
    }

    #[test]
    fn titles_ending_in_a_dot_keep_the_artifact_extension() {
        let target = layout().target(&PageSnapshot::new("DOC", "Version 2.", "/x"));

        let expected: BTreeSet<PathBuf> = [
            PathBuf::from("/srv/mirror/DOC/Version 2..html"),
            PathBuf::from("/srv/mirror/DOC/Version+2..html"),
        ]
        .into_iter()
        .collect();
        assert_eq!(target.output_paths, expected);
        assert!(
            target
                .output_paths
                .iter()
                .all(|path| path.extension() == Some(OsStr::new(ARTIFACT_EXTENSION)))
        );
    }

    #[test]
    fn nocache_label_disables_caching() {
        let layout = layout();
        let page = PageSnapshot::new("DOC", "Secret", "/display/DOC/Secret");
        assert!(layout.target(&page).cacheable);
        assert!(!layout.target(&page.with_label("nocache")).cacheable);
    }

    #[test]
    fn key_ignores_metadata_other_than_space_and_title() {
        let a = PageSnapshot::new("DOC", "Home", "/display/DOC/Home");
        let b = PageSnapshot::new("DOC", "Home", "/pages/viewpage.action?pageId=7").with_label("x");
        assert_eq!(CacheKey::of(&a), CacheKey::of(&b));
        assert_ne!(CacheKey::of(&a), CacheKey::new("OPS", "Home"));
    }

    #[test]
    fn source_url_joins_base_and_path() {
        let layout = layout();
        let page = PageSnapshot::new("DOC", "Home", "/display/DOC/Home");
        assert_eq!(
            layout.source_url(&page),
            "https://wiki.example.com/display/DOC/Home"
        );
        let relative = PageSnapshot::new("DOC", "Home", "display/DOC/Home");
        assert_eq!(
            layout.source_url(&relative),
            "https://wiki.example.com/display/DOC/Home"
        );
    }

    #[test]
    fn file_names_in_filters_by_directory() {
        let layout = layout();
        let target = layout.target(&PageSnapshot::new("DOC", "Foo Bar", "/x"));
        let dir = layout.space_dir("DOC");
        let names: Vec<_> = target.file_names_in(&dir).collect();
        assert_eq!(names, vec![OsStr::new("Foo Bar.html"), OsStr::new("Foo+Bar.html")]);

        let nested = layout.target(&PageSnapshot::new("DOC", "a/b", "/x"));
        assert_eq!(nested.file_names_in(&dir).count(), 0);
    }
}
