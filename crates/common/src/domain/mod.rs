//! Domain types shared by the stores, the ingestion pipeline and the API
//!
//! JSON representations use camelCase field names, matching the payloads
//! the admin UI and public reader exchange with the gateway.

mod clipping;
mod paper;

pub use clipping::{Clipping, CreatedClipping, Region, RegionInput};
pub use paper::{
    parse_schedule_date, DateAvailability, Epaper, PageImage, Paper, PaperMetadata, PaperRendering,
    PaperRevision, RenderStatus, UNTITLED_EDITION,
};
