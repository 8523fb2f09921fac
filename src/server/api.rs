//! Request/response DTOs for the REST surface.

use serde::{Deserialize, Serialize};

use crate::linkcode::DeviceInfo;

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateReq {
    pub tutor_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResp {
    pub message: String,
    pub code: String,
    pub expires_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemReq {
    pub code: String,
    pub device_info: DeviceInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemResp {
    pub message: String,
    pub tutor_id: i32,
    pub child_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChildDto {
    pub id: i32,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceDto {
    pub id: i32,
    pub uuid: String,
    pub name: String,
    pub model: String,
    pub os_version: String,
    pub last_sync: String, // RFC3339 UTC
}
