use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{PostalAddress, PersonName, SourceSystem};

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Seed file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Seed file {path} is not a valid catalogue: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Tenant {tenant_id}: branch range {start}..{end} is inverted")]
    InvertedBranchRange { tenant_id: String, start: u32, end: u32 },
}

/// A participating bank. Branch ids are drawn from `[branch_range_start, branch_range_end]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub name: String,
    #[serde(alias = "tenantid", alias = "tenantId")]
    pub tenant_id: String,
    #[serde(alias = "branchrangestart", alias = "branchRangeStart")]
    pub branch_range_start: u32,
    #[serde(alias = "branchrangeend", alias = "branchRangeEnd")]
    pub branch_range_end: u32,
    #[serde(default, alias = "bicfi")]
    pub bic: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tenants {
    #[serde(default, alias = "rt")]
    pub realtime: Vec<Tenant>,
    #[serde(default, alias = "nrt")]
    pub non_realtime: Vec<Tenant>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: String,
    #[serde(alias = "tenantid", alias = "tenantId")]
    pub tenant_id: String,
    #[serde(default, alias = "accountnumber", alias = "accountNumber")]
    pub account_number: String,
    #[serde(default, alias = "accountidcode", alias = "accountIdCode")]
    pub account_id_code: String,
    #[serde(default, alias = "proxyid", alias = "proxyId")]
    pub proxy_id: String,
    #[serde(default, alias = "proxytype", alias = "proxyType")]
    pub proxy_type: String,
    #[serde(default, alias = "proxydomain", alias = "proxyDomain")]
    pub proxy_domain: String,
    #[serde(default)]
    pub name: PersonName,
    #[serde(default)]
    pub address: PostalAddress,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Accounts {
    #[serde(default)]
    pub good: Vec<Account>,
    /// Present in the schema, never drawn from.
    #[serde(default)]
    pub bad: Vec<Account>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CodeEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionTypes {
    #[serde(default, alias = "EFT")]
    pub eft: Vec<CodeEntry>,
    #[serde(default, alias = "ACD")]
    pub acd: Vec<CodeEntry>,
    #[serde(default, alias = "RTC")]
    pub rtc: Vec<CodeEntry>,
}

impl TransactionTypes {
    pub fn for_stream(&self, stream: SourceSystem) -> &[CodeEntry] {
        match stream {
            SourceSystem::Eft => &self.eft,
            SourceSystem::Acd => &self.acd,
            SourceSystem::Rtc => &self.rtc,
        }
    }
}

/// Historical instruments are identified by `name`, real-time ones by `value`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalInstruments {
    #[serde(default, alias = "hist")]
    pub historical: Vec<CodeEntry>,
    #[serde(default, rename = "real-time", alias = "rpp", alias = "realtime")]
    pub realtime: Vec<CodeEntry>,
}

/// Immutable catalogue of tenants, accounts and code tables, loaded once per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCatalogue {
    #[serde(default)]
    pub tenants: Tenants,
    #[serde(default)]
    pub accounts: Accounts,
    #[serde(default)]
    pub transaction_types: TransactionTypes,
    #[serde(default)]
    pub local_instrument: LocalInstruments,
    #[serde(default)]
    pub charge_bearers: Vec<String>,
}

impl SeedCatalogue {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: shown.clone(),
            source,
        })?;
        let seed = Self::from_json(&raw).map_err(|e| match e {
            SeedError::Parse { source, .. } => SeedError::Parse {
                path: shown.clone(),
                source,
            },
            other => other,
        })?;

        info!(
            seed_file = %shown,
            tenants_rt = seed.tenants.realtime.len(),
            tenants_nrt = seed.tenants.non_realtime.len(),
            accounts = seed.accounts.good.len(),
            "Seed catalogue loaded"
        );
        Ok(seed)
    }

    pub fn from_json(raw: &str) -> Result<Self, SeedError> {
        let seed: SeedCatalogue = serde_json::from_str(raw).map_err(|source| SeedError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        seed.validate()?;
        Ok(seed)
    }

    fn validate(&self) -> Result<(), SeedError> {
        for tenant in self.tenants.realtime.iter().chain(&self.tenants.non_realtime) {
            if tenant.branch_range_start > tenant.branch_range_end {
                return Err(SeedError::InvertedBranchRange {
                    tenant_id: tenant.tenant_id.clone(),
                    start: tenant.branch_range_start,
                    end: tenant.branch_range_end,
                });
            }
        }
        debug!("Seed catalogue validated");
        Ok(())
    }
}

/// Linear lookup of a tenant row by id.
pub fn find_tenant<'a>(tenants: &'a [Tenant], tenant_id: &str) -> Option<&'a Tenant> {
    tenants.iter().find(|t| t.tenant_id == tenant_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"{
        "tenants": {
            "rt":  [{"name": "Bank A", "tenantid": "ten-a", "branchrangestart": 100, "branchrangeend": 199, "bicfi": "BANKAZAJJ"}],
            "nrt": [{"name": "Bank B", "tenantid": "ten-b", "branchrangestart": 5, "branchrangeend": 5}]
        },
        "accounts": {
            "good": [{
                "id": "1", "tenantid": "ten-a", "accountnumber": "1234",
                "name": {"fullName": "Jane Doe", "surname": "Doe"},
                "address": {"townName": "Durban", "country": "ZA"}
            }]
        },
        "transactionTypes": {"eft": [{"name": "PMT"}]},
        "localInstrument": {"hist": [{"name": "1"}], "rpp": [{"value": "INST"}]},
        "chargeBearers": ["SLEV", "DEBT"]
    }"#;

    #[test]
    fn test_parses_original_key_names() {
        let seed = SeedCatalogue::from_json(SEED).unwrap();
        assert_eq!(seed.tenants.realtime[0].bic, "BANKAZAJJ");
        assert_eq!(seed.tenants.non_realtime[0].branch_range_end, 5);
        assert_eq!(seed.accounts.good[0].name.full_name, "Jane Doe");
        assert_eq!(seed.transaction_types.for_stream(SourceSystem::Eft)[0].name, "PMT");
        assert!(seed.transaction_types.for_stream(SourceSystem::Acd).is_empty());
        assert_eq!(seed.local_instrument.realtime[0].value, "INST");
        assert_eq!(seed.charge_bearers.len(), 2);
    }

    #[test]
    fn test_inverted_branch_range_rejected() {
        let raw = r#"{"tenants": {"rt": [{"name": "X", "tenantid": "x", "branchrangestart": 9, "branchrangeend": 1}]}}"#;
        let err = SeedCatalogue::from_json(raw).unwrap_err();
        assert!(matches!(err, SeedError::InvertedBranchRange { .. }));
    }

    #[test]
    fn test_find_tenant() {
        let seed = SeedCatalogue::from_json(SEED).unwrap();
        assert!(find_tenant(&seed.tenants.realtime, "ten-a").is_some());
        assert!(find_tenant(&seed.tenants.realtime, "ten-b").is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join(format!("missing_seed_{}.json", uuid::Uuid::new_v4()));
        assert!(matches!(SeedCatalogue::load(&path), Err(SeedError::Io { .. })));
    }

    #[test]
    fn test_load_from_disk() {
        let path = std::env::temp_dir().join(format!("seed_{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, SEED).unwrap();
        let seed = SeedCatalogue::load(&path).unwrap();
        assert_eq!(seed.accounts.good.len(), 1);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let path = std::env::temp_dir().join(format!("seed_{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "{not json").unwrap();
        match SeedCatalogue::load(&path) {
            Err(SeedError::Parse { path: shown, .. }) => assert_eq!(shown, path.display().to_string()),
            other => panic!("unexpected result: {other:?}"),
        }
        std::fs::remove_file(path).unwrap();
    }
}
