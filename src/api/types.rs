//! Rows exchanged with the campaign backend.
//!
//! Field names on the wire are the backend's Spanish column names.

use serde::{Deserialize, Serialize};

/// Electoral section ("seccional")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  #[serde(rename = "numero")]
  pub number: u32,
  #[serde(rename = "nombre", default)]
  pub name: String,
}

/// Neighborhood ("barrio")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighborhood {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  #[serde(rename = "nombre")]
  pub name: String,
  #[serde(rename = "seccional_id", default)]
  pub section_id: Option<u64>,
}

/// Polling school ("escuela")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct School {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  #[serde(rename = "nombre")]
  pub name: String,
  #[serde(rename = "direccion", default)]
  pub address: Option<String>,
  #[serde(rename = "barrio_id", default)]
  pub neighborhood_id: Option<u64>,
  /// Number of voting tables in the school
  #[serde(rename = "mesas", default)]
  pub tables: u32,
}

/// Party activist ("militante")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activist {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  #[serde(rename = "nombre")]
  pub first_name: String,
  #[serde(rename = "apellido")]
  pub last_name: String,
  #[serde(default)]
  pub dni: Option<String>,
  #[serde(rename = "telefono", default)]
  pub phone: Option<String>,
  #[serde(rename = "barrio_id", default)]
  pub neighborhood_id: Option<u64>,
  /// School the activist watches on election day
  #[serde(rename = "escuela_id", default)]
  pub school_id: Option<u64>,
}

/// Club, union or other organization ("institucion")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  #[serde(rename = "nombre")]
  pub name: String,
  #[serde(rename = "tipo", default)]
  pub kind: Option<String>,
  #[serde(rename = "barrio_id", default)]
  pub neighborhood_id: Option<u64>,
  #[serde(rename = "contacto", default)]
  pub contact: Option<String>,
}

/// Votes for one party list at one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVotes {
  #[serde(rename = "lista")]
  pub list: String,
  #[serde(rename = "votos")]
  pub votes: u32,
}

/// Vote count of one table ("resultado")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResult {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  #[serde(rename = "escuela_id")]
  pub school_id: u64,
  #[serde(rename = "mesa")]
  pub table: u32,
  /// Registered electors at the table
  #[serde(rename = "electores")]
  pub registered: u32,
  /// Envelopes in the box
  #[serde(rename = "votantes")]
  pub voters: u32,
  #[serde(rename = "listas", default)]
  pub lists: Vec<ListVotes>,
  #[serde(rename = "blancos", default)]
  pub blank: u32,
  #[serde(rename = "nulos", default)]
  pub null: u32,
  #[serde(rename = "recurridos", default)]
  pub contested: u32,
}

/// Aggregated figures of one section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionTotals {
  #[serde(rename = "seccional_id")]
  pub section_id: u64,
  #[serde(rename = "escuelas", default)]
  pub schools: u32,
  #[serde(rename = "militantes", default)]
  pub activists: u32,
  #[serde(rename = "instituciones", default)]
  pub institutions: u32,
  #[serde(rename = "mesas_cargadas", default)]
  pub tables_reported: u32,
}

/// Per-section summary ("seccionales_resumen")
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
  #[serde(rename = "seccionales", default)]
  pub sections: Vec<SectionTotals>,
  #[serde(rename = "actualizado", default)]
  pub updated_at: Option<String>,
}
