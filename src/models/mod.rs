//! Data models for Lemming

mod preference;
mod recent_view;

pub use preference::Preference;
pub use recent_view::{PostRef, RecentView};
