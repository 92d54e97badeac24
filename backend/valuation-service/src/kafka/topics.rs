//! Default topic names; each one can be overridden through configuration

pub const LISTING_EVENTS: &str = "listing.events";
pub const LISTING_VALUATIONS: &str = "listing.valuations";
pub const VALUATION_DLQ: &str = "listing.valuation.dlq";
