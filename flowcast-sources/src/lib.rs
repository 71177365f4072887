//! Concrete [`flowcast::network::source::NetworkSource`] and
//! [`flowcast::filter::event::EventSource`] connectors.
//!
//! Kept in a separate crate from `flowcast` itself so the core pipeline
//! stays independent of any one wire format, the same split the teacher
//! repo draws between its core crate and its connector crate.

#![warn(missing_docs)]

pub mod events_xml;
pub mod network_csv_wkt;
pub mod network_geojson;
