/// Service endpoints, reference dataset identifiers and output field names
/// shared across the strategies, the driver and the CLI.

// Default service roots (overridable through config.toml / env)
pub const GBIF_API_BASE_URL: &str = "https://www.gbif.org/api";
pub const CHECKLISTBANK_API_BASE_URL: &str = "https://api.checklistbank.org";
pub const CONNECTIVITY_PROBE_URL: &str = "https://github.com/";

// Reference taxonomy
pub const REFERENCE_DATASET_TITLE: &str = "TAXREF";
pub const REFERENCE_DATASET_KEY: u32 = 2008;
pub const INPN_TAXON_URL_PREFIX: &str = "https://inpn.mnhn.fr/espece/cd_nom/";

// Output fields written back onto the record store
pub const CD_NOM_FIELD: &str = "cd_nom";
pub const TAXREF_NAME_FIELD: &str = "taxref_name";
pub const TAXREF_URL_FIELD: &str = "taxref_url";
pub const OUTPUT_FIELDS: [&str; 3] = [CD_NOM_FIELD, TAXREF_NAME_FIELD, TAXREF_URL_FIELD];
pub const MAX_TEXT_FIELD_CHARS: usize = 254;

// Query shapes
pub const GBIF_CHECKLIST_LIMIT: &str = "100";
pub const CHECKLISTBANK_LIMIT: &str = "50";
pub const CHECKLISTBANK_FACETS: [&str; 12] = [
    "datasetKey",
    "rank",
    "issue",
    "status",
    "nomStatus",
    "nameType",
    "field",
    "authorship",
    "authorshipYear",
    "extinct",
    "environment",
    "origin",
];

// Strategy names (used in CLI output, report and metric labels)
pub const GBIF_STRATEGY: &str = "gbif_id";
pub const NAME_STRATEGY: &str = "scientific_name";

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = concat!("taxref_collector/", env!("CARGO_PKG_VERSION"));

/// Deterministic INPN page for a TAXREF identifier.
pub fn inpn_taxon_url(taxon_id: i64) -> String {
    format!("{}{}", INPN_TAXON_URL_PREFIX, taxon_id)
}
