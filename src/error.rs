//! All error-related ayu types.
//!
//! Every fallible operation in this crate returns [`Result<T>`], whose error
//! variant carries a stable wire-identifier [`ErrorKind`], structured
//! detail, and an optional [`Route`](crate::route::Route) pointing at the
//! sub-item that was being visited when the error occurred. The route is
//! attached lazily: code deep in the [`crate::traversal`] engine raises a
//! bare [`AyuError`] with no route, and the first traversal frame that
//! catches it (and doesn't already have one attached) fills it in by
//! reconstructing the route from its own stack position — the only place
//! on the error path that's allowed to be slow.

use crate::route::Route;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Stable string identifier for an error kind, part of ayu's wire contract:
/// do not rename a variant without also updating anything that matches on
/// [`ErrorKind::code`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    // Tree-level
    TreeWrongForm,
    TreeCantRepresent,
    ParseFailed,
    // Type registry
    TypeNameNotFound,
    TypeCantDefaultConstruct,
    TypeCantDestroy,
    TypeCantCast,
    // Access
    WriteReadonly,
    AddressUnaddressable,
    AccessDenied,
    // Compound ops
    AttrMissing,
    AttrRejected,
    AttrNotFound,
    AttrsNotSupported,
    ElemNotFound,
    ElemsNotSupported,
    LengthRejected,
    LengthTypeInvalid,
    LengthOverflow,
    KeysTypeInvalid,
    // Serialization
    FromTreeNotSupported,
    FromTreeFormRejected,
    FromTreeValueNotFound,
    ToTreeNotSupported,
    ToTreeValueNotFound,
    // Routes
    RouteIRIInvalid,
    ReferenceNotFound,
    // Scanning
    ScanWhileScanning,
    // Document (the Document collaborator reports through this taxonomy too)
    DocumentItemNameInvalid,
    DocumentItemNameDuplicate,
    DocumentItemNotFound,
    // Misc
    General,
    External,
}

impl ErrorKind {
    /// The wire-stable string code for this kind, e.g. `"e_TreeWrongForm"`.
    pub fn code(self) -> &'static str {
        match self {
            Self::TreeWrongForm => "e_TreeWrongForm",
            Self::TreeCantRepresent => "e_TreeCantRepresent",
            Self::ParseFailed => "e_ParseFailed",
            Self::TypeNameNotFound => "e_TypeNameNotFound",
            Self::TypeCantDefaultConstruct => "e_TypeCantDefaultConstruct",
            Self::TypeCantDestroy => "e_TypeCantDestroy",
            Self::TypeCantCast => "e_TypeCantCast",
            Self::WriteReadonly => "e_WriteReadonly",
            Self::AddressUnaddressable => "e_AddressUnaddressable",
            Self::AccessDenied => "e_AccessDenied",
            Self::AttrMissing => "e_AttrMissing",
            Self::AttrRejected => "e_AttrRejected",
            Self::AttrNotFound => "e_AttrNotFound",
            Self::AttrsNotSupported => "e_AttrsNotSupported",
            Self::ElemNotFound => "e_ElemNotFound",
            Self::ElemsNotSupported => "e_ElemsNotSupported",
            Self::LengthRejected => "e_LengthRejected",
            Self::LengthTypeInvalid => "e_LengthTypeInvalid",
            Self::LengthOverflow => "e_LengthOverflow",
            Self::KeysTypeInvalid => "e_KeysTypeInvalid",
            Self::FromTreeNotSupported => "e_FromTreeNotSupported",
            Self::FromTreeFormRejected => "e_FromTreeFormRejected",
            Self::FromTreeValueNotFound => "e_FromTreeValueNotFound",
            Self::ToTreeNotSupported => "e_ToTreeNotSupported",
            Self::ToTreeValueNotFound => "e_ToTreeValueNotFound",
            Self::RouteIRIInvalid => "e_RouteIRIInvalid",
            Self::ReferenceNotFound => "e_ReferenceNotFound",
            Self::ScanWhileScanning => "e_ScanWhileScanning",
            Self::DocumentItemNameInvalid => "e_DocumentItemNameInvalid",
            Self::DocumentItemNameDuplicate => "e_DocumentItemNameDuplicate",
            Self::DocumentItemNotFound => "e_DocumentItemNotFound",
            Self::General => "e_General",
            Self::External => "e_External",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The error type for every fallible operation in this crate.
#[derive(Clone, Debug, Error)]
pub struct AyuError {
    kind: ErrorKind,
    detail: String,
    route: Option<Route>,
}

impl AyuError {
    /// Construct a new error with no route attached yet. Most call sites
    /// inside the traversal engine should use this; the route gets filled in
    /// the first time the error is caught by a traversal frame (see
    /// [`AyuError::with_route_if_missing`]).
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            route: None,
        }
    }

    /// Construct an error that already has a route (used by call sites
    /// outside of a traversal, e.g. [`crate::route::route_from_iri`]).
    pub fn with_route(kind: ErrorKind, detail: impl Into<String>, route: Route) -> Self {
        Self {
            kind,
            detail: detail.into(),
            route: Some(route),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    /// Attach `route` to this error if it doesn't already have one. Returns
    /// `self` so this can be used in a `map_err` chain: reconstructs a route
    /// only if the error hasn't already been tagged with one.
    pub fn with_route_if_missing(mut self, route: impl FnOnce() -> Route) -> Self {
        if self.route.is_none() {
            self.route = Some(route());
        }
        self
    }
}

impl Display for AyuError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)?;
        if let Some(route) = &self.route {
            write!(f, " (at {})", route)?;
        }
        Ok(())
    }
}

/// Shorthand for the `Result` type used throughout this crate.
pub type Result<T> = std::result::Result<T, AyuError>;

/// Convenience macro for constructing an [`AyuError`] with a formatted
/// detail message inline at each error site instead of threading a builder
/// around.
macro_rules! ayu_err {
    ($kind:expr, $($arg:tt)*) => {
        $crate::error::AyuError::new($kind, format!($($arg)*))
    };
}
pub(crate) use ayu_err;
