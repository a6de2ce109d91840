/// Slash-separated remote path split into non-empty segments.
///
/// Remote paths are relative to the webdav root ("A/a1"); leading and
/// trailing slashes carry no meaning.
pub(crate) struct PathComponents<'a>(Vec<&'a str>);

impl<'a> PathComponents<'a> {
    pub fn new(path: &'a str) -> Self {
        Self(path.split('/').filter(|part| !part.is_empty()).collect())
    }

    pub fn as_slice(&self) -> &[&'a str] {
        &self.0
    }

    /// Segments of the containing directory. The path must name something,
    /// so an empty path is a caller bug.
    pub fn parent(&self) -> &[&'a str] {
        let (_, parent) = self
            .0
            .split_last()
            .expect("path must have a final component");
        parent
    }

    pub fn file_name(&self) -> &'a str {
        self.0
            .last()
            .copied()
            .expect("path must have a final component")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_slashes_and_drops_empty_segments() {
        let components = PathComponents::new("/A//a1/");
        assert_eq!(components.as_slice(), ["A", "a1"]);
    }

    #[test]
    fn parent_and_file_name() {
        let components = PathComponents::new("A/B/c");
        assert_eq!(components.parent(), ["A", "B"]);
        assert_eq!(components.file_name(), "c");

        let top = PathComponents::new("A");
        assert!(top.parent().is_empty());
        assert_eq!(top.file_name(), "A");
    }

    #[test]
    fn empty_path_has_no_components() {
        assert!(PathComponents::new("").as_slice().is_empty());
    }

    #[test]
    #[should_panic(expected = "final component")]
    fn file_name_of_empty_path_panics() {
        PathComponents::new("/").file_name();
    }
}
