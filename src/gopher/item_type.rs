//! Gopher item types and the extension-based classifier.

use std::fmt;

/// One-byte item type code that prefixes every directory listing line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemType(pub u8);

impl ItemType {
    /// Plain text file.
    pub const TEXT: ItemType = ItemType(b'0');
    /// Directory (submenu).
    pub const DIRECTORY: ItemType = ItemType(b'1');
    pub const CSO: ItemType = ItemType(b'2');
    /// Error line.
    pub const ERROR: ItemType = ItemType(b'3');
    pub const BINHEX: ItemType = ItemType(b'4');
    pub const DOS_BINARY: ItemType = ItemType(b'5');
    pub const UUENCODED: ItemType = ItemType(b'6');
    /// Full-text search.
    pub const SEARCH: ItemType = ItemType(b'7');
    pub const TELNET: ItemType = ItemType(b'8');
    /// Generic binary file.
    pub const BINARY: ItemType = ItemType(b'9');
    /// Redundant server.
    pub const MIRROR: ItemType = ItemType(b'+');
    pub const TN3270: ItemType = ItemType(b'T');
    pub const GIF: ItemType = ItemType(b'g');
    /// Image of any other format.
    pub const IMAGE: ItemType = ItemType(b'I');
    /// HTML document (common extension).
    pub const HTML: ItemType = ItemType(b'h');
    /// Informational text line (common extension).
    pub const INFO: ItemType = ItemType(b'i');

    /// Raw code byte.
    pub fn code(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 as char)
    }
}

/// Classify a resource by kind and literal (case-sensitive) name suffix.
///
/// This table is the only place item types are derived from names.
pub fn classify(name: &[u8], is_dir: bool) -> ItemType {
    if is_dir {
        return ItemType::DIRECTORY;
    }

    if name.ends_with(b".html") {
        ItemType::HTML
    } else if name.ends_with(b".txt") {
        ItemType::TEXT
    } else if name.ends_with(b".gif") {
        ItemType::GIF
    } else if name.ends_with(b".png") || name.ends_with(b".jpg") || name.ends_with(b".jpeg") {
        ItemType::IMAGE
    } else {
        ItemType::BINARY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_directory() {
        assert_eq!(classify(b"docs", true), ItemType::DIRECTORY);
        // Directories win over any suffix
        assert_eq!(classify(b"site.html", true), ItemType::DIRECTORY);
    }

    #[test]
    fn test_classify_extensions() {
        assert_eq!(classify(b"index.html", false), ItemType::HTML);
        assert_eq!(classify(b"notes.txt", false), ItemType::TEXT);
        assert_eq!(classify(b"anim.gif", false), ItemType::GIF);
        assert_eq!(classify(b"a.png", false), ItemType::IMAGE);
        assert_eq!(classify(b"a.jpg", false), ItemType::IMAGE);
        assert_eq!(classify(b"a.jpeg", false), ItemType::IMAGE);
        assert_eq!(classify(b"archive.tar.gz", false), ItemType::BINARY);
        assert_eq!(classify(b"Makefile", false), ItemType::BINARY);
        assert_eq!(classify(b"caf\xe9.txt", false), ItemType::TEXT);
    }

    #[test]
    fn test_classify_is_case_sensitive() {
        assert_eq!(classify(b"README.TXT", false), ItemType::BINARY);
        assert_eq!(classify(b"photo.PNG", false), ItemType::BINARY);
    }

    #[test]
    fn test_display() {
        assert_eq!(ItemType::TEXT.to_string(), "0");
        assert_eq!(ItemType(b'x').to_string(), "x");
        assert_eq!(ItemType::IMAGE.code(), b'I');
    }
}
