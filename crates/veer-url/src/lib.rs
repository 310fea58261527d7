//! # Veer URL
//!
//! URL tree data model and codec for the veer navigation engine:
//! - Structured, immutable-style `UrlTree` / `UrlSegmentGroup` / `UrlSegment`
//! - Bidirectional text ⇄ tree serializer with matrix params, named outlet
//!   groups, query params and fragment
//! - Tree containment checks with independently configurable comparison axes
//!
//! ## URL shape
//!
//! ```text
//! /team/33;expand=true/(user/11//right:chat)?debug=1#top
//!  └─────┬────────────┘ └──────┬──────────┘ └──┬───┘└┬┘
//!   path + matrix params  named outlet groups  query  fragment
//! ```
//!
//! ## Example
//!
//! ```
//! use veer_url::{DefaultUrlSerializer, UrlSerializer};
//!
//! let serializer = DefaultUrlSerializer::default();
//! let tree = serializer.parse("/team/33/user/11?debug=true").unwrap();
//! assert_eq!(serializer.serialize(&tree), "/team/33/user/11?debug=true");
//! ```

pub mod contains;
pub mod serializer;
pub mod tree;

pub use contains::{
    contains_tree, FragmentCompare, IsActiveMatchOptions, ParamCompare, PathCompare,
};
pub use serializer::{encode_uri_component, DefaultUrlSerializer, ParseError, UrlSerializer};
pub use tree::{
    equal_path, equal_segment_groups, equal_segments, Params, QueryParams, QueryValue, UrlSegment,
    UrlSegmentGroup, UrlTree, PRIMARY_OUTLET,
};
