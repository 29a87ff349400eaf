//! Normalization of caller-supplied open and copy option sets.
//!
//! Every stream, channel, copy and move operation runs from a normalized
//! record, validated before any remote call is made. The original option
//! list is kept on the record for backends that want to inspect it.

use std::fmt;

use crate::{Error, Result};

/// Options accepted when opening streams and byte channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenOption {
    Read,
    Write,
    Append,
    TruncateExisting,
    Create,
    CreateNew,
    DeleteOnClose,
    Sparse,
    Sync,
    Dsync,
    NoFollowLinks,
}

impl OpenOption {
    /// Options accepted everywhere and acted on nowhere.
    fn is_ignored(&self) -> bool {
        matches!(
            self,
            OpenOption::Sparse | OpenOption::Sync | OpenOption::Dsync | OpenOption::NoFollowLinks
        )
    }
}

impl fmt::Display for OpenOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpenOption::Read => "READ",
            OpenOption::Write => "WRITE",
            OpenOption::Append => "APPEND",
            OpenOption::TruncateExisting => "TRUNCATE_EXISTING",
            OpenOption::Create => "CREATE",
            OpenOption::CreateNew => "CREATE_NEW",
            OpenOption::DeleteOnClose => "DELETE_ON_CLOSE",
            OpenOption::Sparse => "SPARSE",
            OpenOption::Sync => "SYNC",
            OpenOption::Dsync => "DSYNC",
            OpenOption::NoFollowLinks => "NOFOLLOW_LINKS",
        };
        f.write_str(name)
    }
}

/// The normalized form of an open-option set.
///
/// Exactly one of `read` and `write` is set: no backend supports in-place
/// seek, so mixed read/write channels are rejected up front. For writes,
/// truncation is the complement of `append`.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub delete_on_close: bool,
    original: Vec<OpenOption>,
}

impl OpenOptions {
    fn new(original: &[OpenOption]) -> Self {
        OpenOptions {
            read: false,
            write: false,
            append: false,
            create: false,
            create_new: false,
            delete_on_close: false,
            original: original.to_vec(),
        }
    }

    /// The option list as the caller supplied it.
    pub fn original(&self) -> &[OpenOption] {
        &self.original
    }

    /// Normalizes options for an input stream: `READ` and `DELETE_ON_CLOSE`
    /// are accepted, the ignored set is tolerated, anything else is
    /// rejected.
    pub fn for_new_input_stream(options: &[OpenOption]) -> Result<Self> {
        let mut normalized = OpenOptions::new(options);
        normalized.read = true;
        for option in options {
            match option {
                OpenOption::Read => {}
                OpenOption::DeleteOnClose => normalized.delete_on_close = true,
                other if other.is_ignored() => {}
                other => return Err(unsupported(other)),
            }
        }
        Ok(normalized)
    }

    /// Normalizes options for an output stream. An empty set defaults to
    /// `CREATE` + `TRUNCATE_EXISTING` + `WRITE`; `APPEND` together with
    /// `TRUNCATE_EXISTING` is contradictory.
    pub fn for_new_output_stream(options: &[OpenOption]) -> Result<Self> {
        let mut normalized = OpenOptions::new(options);
        normalized.write = true;
        if options.iter().all(OpenOption::is_ignored) {
            normalized.create = true;
            return Ok(normalized);
        }
        let mut truncate = false;
        for option in options {
            match option {
                OpenOption::Write => {}
                OpenOption::Append => normalized.append = true,
                OpenOption::TruncateExisting => truncate = true,
                OpenOption::Create => normalized.create = true,
                OpenOption::CreateNew => normalized.create_new = true,
                OpenOption::DeleteOnClose => normalized.delete_on_close = true,
                other if other.is_ignored() => {}
                other => return Err(unsupported(other)),
            }
        }
        if normalized.append && truncate {
            return Err(Error::invalid_argument(
                "APPEND and TRUNCATE_EXISTING cannot be combined",
            ));
        }
        Ok(normalized)
    }

    /// Normalizes options for a byte channel. Read and write are mutually
    /// exclusive; with neither present the channel defaults to read;
    /// `APPEND` implies a write-only channel and cannot be combined with
    /// `READ` or `TRUNCATE_EXISTING`.
    pub fn for_new_byte_channel(options: &[OpenOption]) -> Result<Self> {
        let mut normalized = OpenOptions::new(options);
        let mut truncate = false;
        for option in options {
            match option {
                OpenOption::Read => normalized.read = true,
                OpenOption::Write => normalized.write = true,
                OpenOption::Append => normalized.append = true,
                OpenOption::TruncateExisting => truncate = true,
                OpenOption::Create => normalized.create = true,
                OpenOption::CreateNew => normalized.create_new = true,
                OpenOption::DeleteOnClose => normalized.delete_on_close = true,
                other if other.is_ignored() => {}
                other => return Err(unsupported(other)),
            }
        }
        if normalized.read && normalized.write {
            return Err(Error::invalid_argument(
                "READ and WRITE cannot be combined on a remote channel",
            ));
        }
        if normalized.append {
            if normalized.read {
                return Err(Error::invalid_argument("APPEND cannot be combined with READ"));
            }
            if truncate {
                return Err(Error::invalid_argument(
                    "APPEND and TRUNCATE_EXISTING cannot be combined",
                ));
            }
            normalized.write = true;
        }
        if !normalized.read && !normalized.write {
            normalized.read = true;
        }
        Ok(normalized)
    }
}

fn unsupported(option: &OpenOption) -> Error {
    Error::UnsupportedOption {
        option: option.to_string(),
    }
}

/// Options accepted when copying and moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyOption {
    ReplaceExisting,
    CopyAttributes,
    AtomicMove,
    NoFollowLinks,
}

impl fmt::Display for CopyOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CopyOption::ReplaceExisting => "REPLACE_EXISTING",
            CopyOption::CopyAttributes => "COPY_ATTRIBUTES",
            CopyOption::AtomicMove => "ATOMIC_MOVE",
            CopyOption::NoFollowLinks => "NOFOLLOW_LINKS",
        };
        f.write_str(name)
    }
}

/// The normalized form of a copy-option set.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub replace_existing: bool,
    /// Only ever true for a move within one filesystem.
    pub atomic_move: bool,
    original: Vec<CopyOption>,
}

impl CopyOptions {
    fn new(original: &[CopyOption]) -> Self {
        CopyOptions {
            replace_existing: false,
            atomic_move: false,
            original: original.to_vec(),
        }
    }

    /// The option list as the caller supplied it.
    pub fn original(&self) -> &[CopyOption] {
        &self.original
    }

    /// Normalizes options for a copy: `REPLACE_EXISTING` is accepted,
    /// `NOFOLLOW_LINKS` ignored, everything else rejected.
    pub fn for_copy(options: &[CopyOption]) -> Result<Self> {
        let mut normalized = CopyOptions::new(options);
        for option in options {
            match option {
                CopyOption::ReplaceExisting => normalized.replace_existing = true,
                CopyOption::NoFollowLinks => {}
                other => {
                    return Err(Error::UnsupportedOption {
                        option: other.to_string(),
                    });
                }
            }
        }
        Ok(normalized)
    }

    /// Normalizes options for a move: like [`for_copy`][CopyOptions::for_copy],
    /// plus `ATOMIC_MOVE` when source and target share a filesystem.
    pub fn for_move(same_file_system: bool, options: &[CopyOption]) -> Result<Self> {
        let mut normalized = CopyOptions::new(options);
        for option in options {
            match option {
                CopyOption::ReplaceExisting => normalized.replace_existing = true,
                CopyOption::AtomicMove if same_file_system => normalized.atomic_move = true,
                CopyOption::NoFollowLinks => {}
                other => {
                    return Err(Error::UnsupportedOption {
                        option: other.to_string(),
                    });
                }
            }
        }
        Ok(normalized)
    }
}
