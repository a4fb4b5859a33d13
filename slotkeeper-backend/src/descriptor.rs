//! Deployment descriptors handed to the orchestrator.

use std::sync::Arc;

use serde::Serialize;
use slotkeeper_db::{GameServerRecord, Repository, Requester};
use uuid::Uuid;

use crate::connections::require_trusted;
use crate::error::AppError;

pub const DESCRIPTOR_API_VERSION: &str = "slotkeeper.io/v1";
pub const DESCRIPTOR_KIND: &str = "GameServer";

/// Base URL and token a deployed server uses to call back into the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiEndpoint {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub api_v1: Option<ApiEndpoint>,
    pub api_v2: Option<ApiEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorDescriptor {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub metadata: DescriptorMetadata,
    pub spec: DescriptorSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorSpec {
    pub id: Uuid,
    pub settings: DescriptorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorSettings {
    pub api: DescriptorApis,
    pub release_id: Uuid,
    pub world_id: Uuid,
    pub game_mode_id: Option<Uuid>,
    pub region_id: Option<Uuid>,
    pub public: bool,
    pub max_players: u32,
    pub reserved_slots: ReservedSlots,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorApis {
    pub v1: ApiEndpoint,
    pub v2: ApiEndpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservedSlots {
    pub enabled: bool,
    pub count: u32,
}

impl OrchestratorDescriptor {
    pub fn for_server(
        server: &GameServerRecord,
        settings: &OrchestratorSettings,
        reserved_slots: u32,
    ) -> Result<Self, AppError> {
        let v1 = settings
            .api_v1
            .clone()
            .ok_or_else(|| AppError::DescriptorUnavailable("api v1 endpoint not configured".into()))?;
        let v2 = settings
            .api_v2
            .clone()
            .ok_or_else(|| AppError::DescriptorUnavailable("api v2 endpoint not configured".into()))?;

        Ok(Self {
            api_version: DESCRIPTOR_API_VERSION,
            kind: DESCRIPTOR_KIND,
            metadata: DescriptorMetadata {
                name: format!("gs-{}", server.id),
            },
            spec: DescriptorSpec {
                id: server.id,
                settings: DescriptorSettings {
                    api: DescriptorApis { v1, v2 },
                    release_id: server.release_id,
                    world_id: server.world_id,
                    game_mode_id: server.game_mode_id,
                    region_id: server.region_id,
                    public: server.public,
                    max_players: server.max_players,
                    reserved_slots: ReservedSlots {
                        enabled: reserved_slots > 0,
                        count: reserved_slots,
                    },
                },
            },
        })
    }
}

#[derive(Clone)]
pub struct DescriptorBuilder {
    repo: Arc<dyn Repository>,
    settings: OrchestratorSettings,
    reserved_slots: u32,
}

impl DescriptorBuilder {
    pub fn new(repo: Arc<dyn Repository>, settings: OrchestratorSettings, reserved_slots: u32) -> Self {
        Self {
            repo,
            settings,
            reserved_slots,
        }
    }

    pub async fn build(
        &self,
        server_id: Uuid,
        requester: &Requester,
    ) -> Result<OrchestratorDescriptor, AppError> {
        require_trusted(requester)?;
        let server = self.repo.get_server(server_id).await?;
        OrchestratorDescriptor::for_server(&server, &self.settings, self.reserved_slots)
    }
}
