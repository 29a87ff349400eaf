//! POSIX-shaped file attributes, views, and the attribute vocabulary.
//!
//! One fixed table maps every attribute name to its view membership, its
//! getter on [`PosixFileAttributes`], and, for writable attributes, the
//! backend operation a setter translates to. The table is the single
//! source of truth consulted by selector parsing, projection and
//! `set_attribute` dispatch.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use time::OffsetDateTime;

use crate::{Error, Result};

bitflags! {
    /// The nine POSIX permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PosixPermissions: u16 {
        const OWNER_READ = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXECUTE = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXECUTE = 0o010;
        const OTHERS_READ = 0o004;
        const OTHERS_WRITE = 0o002;
        const OTHERS_EXECUTE = 0o001;
    }
}

impl PosixPermissions {
    /// Extracts the nine permission bits from a full mode word.
    pub fn from_mode(mode: u32) -> Self {
        PosixPermissions::from_bits_truncate((mode & 0o777) as u16)
    }

    /// The permission bits as the low nine bits of a mode word.
    pub fn mode(&self) -> u32 {
        self.bits() as u32
    }
}

impl fmt::Display for PosixPermissions {
    /// The traditional `rwxr-x---` rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut render = |read, write, execute| {
            let r = if self.contains(read) { 'r' } else { '-' };
            let w = if self.contains(write) { 'w' } else { '-' };
            let x = if self.contains(execute) { 'x' } else { '-' };
            write!(f, "{r}{w}{x}")
        };
        render(
            PosixPermissions::OWNER_READ,
            PosixPermissions::OWNER_WRITE,
            PosixPermissions::OWNER_EXECUTE,
        )?;
        render(
            PosixPermissions::GROUP_READ,
            PosixPermissions::GROUP_WRITE,
            PosixPermissions::GROUP_EXECUTE,
        )?;
        render(
            PosixPermissions::OTHERS_READ,
            PosixPermissions::OTHERS_WRITE,
            PosixPermissions::OTHERS_EXECUTE,
        )
    }
}

/// What kind of entry a path points at. The kinds are mutually exclusive;
/// a synthetic directory marker on an object store is a directory, never
/// also a regular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    SymbolicLink,
    Other,
}

impl FileType {
    pub fn is_regular_file(&self) -> bool {
        matches!(self, FileType::Regular)
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_symbolic_link(&self) -> bool {
        matches!(self, FileType::SymbolicLink)
    }

    pub fn is_other(&self) -> bool {
        matches!(self, FileType::Other)
    }
}

/// One POSIX-shaped attribute record.
///
/// Timestamps and principals may be absent: object stores have no creation
/// time or owner to report.
#[derive(Debug, Clone, PartialEq)]
pub struct PosixFileAttributes {
    pub file_type: FileType,
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
    pub last_access: Option<OffsetDateTime>,
    pub creation: Option<OffsetDateTime>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub permissions: PosixPermissions,
}

impl PosixFileAttributes {
    /// A regular file of the given size with no further metadata.
    pub fn regular(size: u64) -> Self {
        PosixFileAttributes {
            file_type: FileType::Regular,
            size,
            last_modified: None,
            last_access: None,
            creation: None,
            owner: None,
            group: None,
            permissions: PosixPermissions::empty(),
        }
    }

    /// A directory with no further metadata.
    pub fn directory() -> Self {
        PosixFileAttributes {
            file_type: FileType::Directory,
            ..PosixFileAttributes::regular(0)
        }
    }
}

/// The named attribute views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeView {
    Basic,
    Owner,
    Posix,
}

impl AttributeView {
    pub fn name(&self) -> &'static str {
        match self {
            AttributeView::Basic => "basic",
            AttributeView::Owner => "owner",
            AttributeView::Posix => "posix",
        }
    }
}

impl FromStr for AttributeView {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basic" => Ok(AttributeView::Basic),
            "owner" => Ok(AttributeView::Owner),
            "posix" => Ok(AttributeView::Posix),
            other => Err(Error::UnsupportedView {
                view: other.to_string(),
            }),
        }
    }
}

/// One projected attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Size(u64),
    Time(Option<OffsetDateTime>),
    Principal(Option<String>),
    Permissions(PosixPermissions),
}

/// The backend operation a writable attribute translates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetOperation {
    LastModified,
    LastAccess,
    Creation,
    Owner,
    Group,
    Permissions,
}

struct AttributeSpec {
    name: &'static str,
    /// Members of the basic view; `owner` alone forms the owner view and
    /// the posix view spans the whole table.
    basic: bool,
    get: fn(&PosixFileAttributes) -> AttributeValue,
    set: Option<SetOperation>,
}

static VOCABULARY: &[AttributeSpec] = &[
    AttributeSpec {
        name: "lastModifiedTime",
        basic: true,
        get: |a| AttributeValue::Time(a.last_modified),
        set: Some(SetOperation::LastModified),
    },
    AttributeSpec {
        name: "lastAccessTime",
        basic: true,
        get: |a| AttributeValue::Time(a.last_access),
        set: Some(SetOperation::LastAccess),
    },
    AttributeSpec {
        name: "creationTime",
        basic: true,
        get: |a| AttributeValue::Time(a.creation),
        set: Some(SetOperation::Creation),
    },
    AttributeSpec {
        name: "size",
        basic: true,
        get: |a| AttributeValue::Size(a.size),
        set: None,
    },
    AttributeSpec {
        name: "isRegularFile",
        basic: true,
        get: |a| AttributeValue::Bool(a.file_type.is_regular_file()),
        set: None,
    },
    AttributeSpec {
        name: "isDirectory",
        basic: true,
        get: |a| AttributeValue::Bool(a.file_type.is_directory()),
        set: None,
    },
    AttributeSpec {
        name: "isSymbolicLink",
        basic: true,
        get: |a| AttributeValue::Bool(a.file_type.is_symbolic_link()),
        set: None,
    },
    AttributeSpec {
        name: "isOther",
        basic: true,
        get: |a| AttributeValue::Bool(a.file_type.is_other()),
        set: None,
    },
    AttributeSpec {
        name: "owner",
        basic: false,
        get: |a| AttributeValue::Principal(a.owner.clone()),
        set: Some(SetOperation::Owner),
    },
    AttributeSpec {
        name: "group",
        basic: false,
        get: |a| AttributeValue::Principal(a.group.clone()),
        set: Some(SetOperation::Group),
    },
    AttributeSpec {
        name: "permissions",
        basic: false,
        get: |a| AttributeValue::Permissions(a.permissions),
        set: Some(SetOperation::Permissions),
    },
];

fn in_view(spec: &AttributeSpec, view: AttributeView) -> bool {
    match view {
        AttributeView::Basic => spec.basic,
        AttributeView::Owner => spec.name == "owner",
        AttributeView::Posix => true,
    }
}

fn lookup(view: AttributeView, name: &str) -> Result<&'static AttributeSpec> {
    VOCABULARY
        .iter()
        .find(|spec| spec.name == name && in_view(spec, view))
        .ok_or_else(|| Error::UnsupportedAttribute {
            attribute: format!("{}:{name}", view.name()),
        })
}

/// A parsed `view:name[,name…]` attribute selector. The view defaults to
/// `basic`; a `*` name requests the view's whole vocabulary.
#[derive(Debug, Clone)]
pub struct AttributeSelector {
    view: AttributeView,
    names: Vec<String>,
    all: bool,
}

impl AttributeSelector {
    pub fn view(&self) -> AttributeView {
        self.view
    }

    /// Parses a read selector.
    pub fn parse(selector: &str) -> Result<Self> {
        let (view, names) = split_view(selector)?;
        if names.is_empty() {
            return Err(Error::UnsupportedAttribute {
                attribute: selector.to_string(),
            });
        }
        let mut parsed = Vec::new();
        let mut all = false;
        for name in names.split(',') {
            if name == "*" {
                all = true;
                continue;
            }
            // Validate eagerly so a bad selector fails before any I/O.
            lookup(view, name)?;
            parsed.push(name.to_string());
        }
        Ok(AttributeSelector {
            view,
            names: parsed,
            all,
        })
    }

    /// Parses a write selector, which names exactly one writable attribute.
    /// Returns the view, the name, and the backend operation.
    pub(crate) fn parse_for_write(selector: &str) -> Result<(AttributeView, String, SetOperation)> {
        let (view, name) = split_view(selector)?;
        if name.contains(',') || name == "*" || name.is_empty() {
            return Err(Error::UnsupportedAttribute {
                attribute: selector.to_string(),
            });
        }
        let spec = lookup(view, name)?;
        let operation = spec.set.ok_or_else(|| Error::UnsupportedAttribute {
            attribute: format!("{}:{name}", view.name()),
        })?;
        Ok((view, spec.name.to_string(), operation))
    }

    /// Projects an attribute record into exactly the selected subset,
    /// keyed by plain attribute name.
    pub fn project(&self, attributes: &PosixFileAttributes) -> BTreeMap<String, AttributeValue> {
        let mut projected = BTreeMap::new();
        if self.all {
            for spec in VOCABULARY.iter().filter(|spec| in_view(spec, self.view)) {
                projected.insert(spec.name.to_string(), (spec.get)(attributes));
            }
        }
        for name in &self.names {
            // Validated during parse; missing entries cannot occur here.
            if let Ok(spec) = lookup(self.view, name) {
                projected.insert(spec.name.to_string(), (spec.get)(attributes));
            }
        }
        projected
    }
}

fn split_view(selector: &str) -> Result<(AttributeView, &str)> {
    match selector.split_once(':') {
        Some((view, rest)) => Ok((view.parse()?, rest)),
        None => Ok((AttributeView::Basic, selector)),
    }
}
