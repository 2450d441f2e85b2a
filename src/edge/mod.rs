//! Referrer-check edge: serves a pixel to the expected site, redirects everyone else.

pub mod referrer;
pub mod router;

pub use referrer::{check_referrer, EdgeResponse, PIXEL_GIF};
pub use router::edge_router;
