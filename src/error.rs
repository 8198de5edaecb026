use std::fmt;

use crate::store::StoreError;

/// Errors raised by the domain entities and the application services.
///
/// Domain mutators raise the precise variant; services translate the
/// intent-idempotent ones (`VersionAlreadyExists`, `AssetAlreadyBound`,
/// `DuplicateReference`) into successful no-ops and propagate everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The id is unknown in the relevant store.
    NotFound { id: String },
    /// Creation of an id that is currently live or deleted.
    AlreadyExists { id: String },
    /// A mutation was attempted on a deleted entity.
    AlreadyDeleted { id: String },
    /// The appended version is identical to the current latest one.
    VersionAlreadyExists { id: String },
    /// The slot is not declared in the document's latest version.
    AssetSlotUnknown { slot: String },
    /// The URI is identical to the slot's current one.
    AssetAlreadyBound { slot: String },
    /// The referenced id is already present in the container's items.
    DuplicateReference { id: String },
    /// The reference target does not currently exist.
    UnknownReference { id: String },
    /// The entity write succeeded but the change-log append did not.
    /// The entity write is left in place for an operator-driven retry.
    ChangeLogAppendFailed(StoreError),
    /// Malformed input at the boundary.
    Validation(String),
    /// A persistence failure that is not expressible as one of the above.
    Store(StoreError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound { id } => {
                write!(f, "cannot fetch data with id \"{}\": data does not exist", id)
            }
            Error::AlreadyExists { id } => {
                write!(f, "cannot add data with id \"{}\": the id is already in use", id)
            }
            Error::AlreadyDeleted { id } => {
                write!(f, "cannot modify entity \"{}\": the entity is deleted", id)
            }
            Error::VersionAlreadyExists { id } => write!(
                f,
                "could not add version to \"{}\": the version is equal to the latest one",
                id
            ),
            Error::AssetSlotUnknown { slot } => {
                write!(f, "cannot add version for \"{}\": unknown asset slot", slot)
            }
            Error::AssetAlreadyBound { slot } => write!(
                f,
                "could not add version for \"{}\": the uri is equal to the current one",
                slot
            ),
            Error::DuplicateReference { id } => {
                write!(f, "cannot add item \"{}\": the id is already present", id)
            }
            Error::UnknownReference { id } => {
                write!(f, "cannot reference \"{}\": no such entity", id)
            }
            Error::ChangeLogAppendFailed(err) => write!(
                f,
                "entity write succeeded but the change log append failed: {}",
                err
            ),
            Error::Validation(msg) => write!(f, "{}", msg),
            Error::Store(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ChangeLogAppendFailed(err) | Error::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id, .. } => Error::NotFound { id },
            StoreError::AlreadyExists { id, .. } => Error::AlreadyExists { id },
            other => Error::Store(other),
        }
    }
}
