// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedded structured queries: syntax checking, projection fields and the
//! query index built from them

pub mod fields;
pub mod index;
pub mod parser;

pub use fields::extract_fields;
pub use index::{find_queries, QueryIndex};
pub use parser::{parse, QueryParseError};
