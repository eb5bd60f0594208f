//! Clippings: saved rectangular crops of one rendered page

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// Crop rectangle in page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Region fields exactly as they arrived from the client
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionInput {
    pub x: Option<String>,
    pub y: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
}

impl RegionInput {
    /// Parse all four fields; each must be present and a finite number.
    pub fn parse(&self) -> Result<Region> {
        Ok(Region {
            x: parse_coordinate("x", self.x.as_deref())?,
            y: parse_coordinate("y", self.y.as_deref())?,
            width: parse_coordinate("width", self.width.as_deref())?,
            height: parse_coordinate("height", self.height.as_deref())?,
        })
    }

    /// Assign a form field such as `coordinates[width]` or `width`
    pub fn set_field(&mut self, name: &str, value: String) -> bool {
        let key = name
            .strip_prefix("coordinates[")
            .and_then(|rest| rest.strip_suffix(']'))
            .or_else(|| name.strip_prefix("coordinates."))
            .unwrap_or(name);

        let slot = match key {
            "x" => &mut self.x,
            "y" => &mut self.y,
            "width" => &mut self.width,
            "height" => &mut self.height,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

fn parse_coordinate(field: &str, raw: Option<&str>) -> Result<f64> {
    let invalid = || AppError::InvalidCoordinates {
        field: field.to_string(),
        value: raw.unwrap_or_default().to_string(),
    };
    let value: f64 = raw.ok_or_else(invalid)?.trim().parse().map_err(|_| invalid())?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid())
    }
}

/// A saved crop, addressable by its globally unique clip id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clipping {
    pub clip_id: i64,
    pub owner_tenant_id: Option<Uuid>,
    pub paper_id: Uuid,
    pub page_number: u32,
    pub region: Region,
    pub image_ref: String,
    pub created_at: DateTime<Utc>,
}

/// What the caller gets back after a successful CreateClipping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedClipping {
    pub clip_id: i64,
    pub image_ref: String,
}
