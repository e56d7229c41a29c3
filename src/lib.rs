//! Shared core for the location-diary pipeline.
//!
//! The pipeline turns a raw stream of timestamped geographic samples into a
//! per-day movement record: ingest writes raw objects, merge folds them into
//! a canonical per-(device, UTC day) point file, segmentation detects stays
//! and visits, enrichment attaches reverse-geocoded labels, and the trips
//! stage materializes the journeys between consecutive stays.
//!
//! Stages communicate only through object keys in a shared bucket; every
//! remote dependency (object store, geocoder, route calculator, tracker,
//! async invocation) is a capability trait so tests can substitute in-memory
//! fakes.
#![allow(async_fn_in_trait)]

pub mod config;
pub mod geo;
pub mod invoke;
pub mod keys;
pub mod location;
pub mod model;
pub mod payload;
pub mod retry;
pub mod stages;
pub mod store;
