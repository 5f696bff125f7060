//! CRUD wrappers for the clinic's resource collections.
//!
//! Body shapes are whatever the backend defines; callers pick the type to
//! decode into (`serde_json::Value` when they only pass data through).

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use super::ApiClient;
use crate::models::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Users,
    Pets,
    Appointments,
    Consultations,
    ClinicalHistories,
    Inventory,
    Billing,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::Users,
        Resource::Pets,
        Resource::Appointments,
        Resource::Consultations,
        Resource::ClinicalHistories,
        Resource::Inventory,
        Resource::Billing,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::Pets => "pets",
            Resource::Appointments => "appointments",
            Resource::Consultations => "consultations",
            Resource::ClinicalHistories => "clinical-histories",
            Resource::Inventory => "inventory",
            Resource::Billing => "billing",
        }
    }

    /// Collection path, relative to the API base
    pub fn path(self) -> &'static str {
        match self {
            Resource::Users => "/users/",
            Resource::Pets => "/pets/",
            Resource::Appointments => "/appointments/",
            Resource::Consultations => "/consultations/",
            Resource::ClinicalHistories => "/clinical-histories/",
            Resource::Inventory => "/inventory/",
            Resource::Billing => "/billing/",
        }
    }

    pub fn item_path(self, id: impl fmt::Display) -> String {
        format!("{}{}/", self.path(), id)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown resource '{0}' (expected one of: users, pets, appointments, consultations, clinical-histories, inventory, billing)")]
pub struct UnknownResource(pub String);

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        let resource = match normalized.as_str() {
            "users" | "user" => Resource::Users,
            "pets" | "pet" => Resource::Pets,
            "appointments" | "appointment" => Resource::Appointments,
            "consultations" | "consultation" => Resource::Consultations,
            "clinical-histories" | "clinical-history" | "histories" | "history" => {
                Resource::ClinicalHistories
            }
            "inventory" => Resource::Inventory,
            "billing" | "bills" | "invoices" => Resource::Billing,
            _ => return Err(UnknownResource(s.to_string())),
        };
        Ok(resource)
    }
}

/// Client for one resource collection, borrowed from an [`ApiClient`].
pub struct ResourceClient<'a> {
    client: &'a ApiClient,
    resource: Resource,
}

impl<'a> ResourceClient<'a> {
    pub fn new(client: &'a ApiClient, resource: Resource) -> Self {
        Self { client, resource }
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub async fn list<T: DeserializeOwned>(&self) -> Result<Page<T>> {
        self.client
            .get(self.resource.path())
            .await
            .with_context(|| format!("Failed to list {}", self.resource))
    }

    /// List with query parameters (filters, search, page number).
    pub async fn list_query<T: DeserializeOwned>(&self, query: &[(&str, &str)]) -> Result<Page<T>> {
        self.client
            .get_query(self.resource.path(), query)
            .await
            .with_context(|| format!("Failed to list {}", self.resource))
    }

    /// Follow the `next` link of a paginated response.
    pub async fn next_page<T: DeserializeOwned>(&self, page: &Page<T>) -> Result<Option<Page<T>>> {
        match page.next {
            Some(ref next) => {
                let page = self
                    .client
                    .get(next)
                    .await
                    .with_context(|| format!("Failed to fetch next page of {}", self.resource))?;
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, id: impl fmt::Display) -> Result<T> {
        let path = self.resource.item_path(id);
        self.client
            .get(&path)
            .await
            .with_context(|| format!("Failed to fetch {}", path))
    }

    pub async fn create<T: DeserializeOwned, B: Serialize + ?Sized>(&self, body: &B) -> Result<T> {
        self.client
            .post(self.resource.path(), body)
            .await
            .with_context(|| format!("Failed to create in {}", self.resource))
    }

    /// Full replacement (`PUT`).
    pub async fn update<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        id: impl fmt::Display,
        body: &B,
    ) -> Result<T> {
        let path = self.resource.item_path(id);
        self.client
            .put(&path, body)
            .await
            .with_context(|| format!("Failed to update {}", path))
    }

    /// Partial update (`PATCH`).
    pub async fn partial_update<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        id: impl fmt::Display,
        body: &B,
    ) -> Result<T> {
        let path = self.resource.item_path(id);
        self.client
            .patch(&path, body)
            .await
            .with_context(|| format!("Failed to update {}", path))
    }

    pub async fn delete(&self, id: impl fmt::Display) -> Result<()> {
        let path = self.resource.item_path(id);
        self.client
            .delete(&path)
            .await
            .with_context(|| format!("Failed to delete {}", path))
    }
}
