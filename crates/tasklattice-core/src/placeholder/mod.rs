//! Typed placeholders: `{{TL name = default [, type: T] [, domain: D]
//! [, desc: "…"]}}` embedded in arbitrary text files.

pub mod model;
pub mod parse;
pub mod resolve;
pub mod scan;

pub use model::{
    Domain, DomainRaw, EffectiveType, IntervalRaw, ParamName, ParamResolved, ParamUnresolved,
    Placeholder, QuoteContext, QuoteStyle, SetRaw, ValueLiteral,
};
pub use parse::parse_param_unresolved;
pub use resolve::resolve_param;
pub use scan::scan_placeholders;
