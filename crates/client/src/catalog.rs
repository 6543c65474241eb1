//! Static service catalog.
//!
//! Maps a logical service key to the pieces of its endpoint:
//!
//! ```text
//! https://{name}.{region}.{cloud}/{version}/{project_id}/{resource_base}/
//! ```
//!
//! Global services drop the region segment unless region pinning is on;
//! project-less services drop the project segment. Several keys can share
//! one host (`ecs`, `ecsv11`, `ecsv21`); a custom endpoint set for the base
//! key is copied onto the keys derived from it.

use std::{collections::HashMap, sync::LazyLock};

/// Endpoint construction rules for one service key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Host name fragment.
    pub name: &'static str,
    /// API version path segment.
    pub version: &'static str,
    /// Fixed suffix after the project segment; empty for none.
    pub resource_base: &'static str,
    /// Uses the domain-scoped client.
    pub admin: bool,
    /// The URL has no project segment.
    pub without_project_id: bool,
    /// The host has no region segment.
    pub global: bool,
}

impl CatalogEntry {
    /// A regional, project-scoped entry.
    #[must_use]
    pub const fn regional(name: &'static str, version: &'static str) -> Self {
        Self {
            name,
            version,
            resource_base: "",
            admin: false,
            without_project_id: false,
            global: false,
        }
    }

    /// A global, project-scoped entry.
    #[must_use]
    pub const fn global(name: &'static str, version: &'static str) -> Self {
        Self { global: true, ..Self::regional(name, version) }
    }

    /// Marks the entry as served by the domain-scoped client.
    #[must_use]
    pub const fn admin(self) -> Self {
        Self { admin: true, ..self }
    }

    /// Drops the project segment.
    #[must_use]
    pub const fn without_project_id(self) -> Self {
        Self { without_project_id: true, ..self }
    }

    /// Sets the fixed resource-base suffix.
    #[must_use]
    pub const fn resource_base(self, resource_base: &'static str) -> Self {
        Self { resource_base, ..self }
    }

    /// Returns `true` if the entry can build an endpoint on its own.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.version.is_empty()
    }

    /// Composes the resource base under `endpoint`.
    ///
    /// `endpoint` must end with `/`. The project segment is added only when
    /// the entry requires one and `project_id` is known.
    #[must_use]
    pub fn resource_base_url(&self, endpoint: &str, project_id: Option<&str>) -> String {
        let mut url = format!("{endpoint}{}/", self.version);
        if !self.without_project_id
            && let Some(project_id) = project_id.filter(|id| !id.is_empty())
        {
            url.push_str(project_id);
            url.push('/');
        }
        if !self.resource_base.is_empty() {
            url.push_str(self.resource_base);
            url.push('/');
        }
        url
    }
}

const ENTRIES: &[(&str, CatalogEntry)] = &[
    // Global services
    ("iam", CatalogEntry::global("iam", "v3.0").admin().without_project_id()),
    ("identity", CatalogEntry::global("iam", "v3").admin().without_project_id()),
    ("cdn", CatalogEntry::global("cdn", "v1.0").admin().without_project_id()),
    ("eps", CatalogEntry::global("eps", "v1.0").admin().without_project_id()),
    ("bss", CatalogEntry::global("bss", "v1.0").admin()),
    ("bssv2", CatalogEntry::global("bss", "v2").admin().without_project_id()),
    ("dns", CatalogEntry::global("dns", "v2").without_project_id()),
    ("dns_region", CatalogEntry::regional("dns", "v2").without_project_id()),
    // Compute
    ("ecs", CatalogEntry::regional("ecs", "v1")),
    ("ecsv11", CatalogEntry::regional("ecs", "v1.1")),
    ("ecsv21", CatalogEntry::regional("ecs", "v2.1")),
    ("autoscaling", CatalogEntry::regional("as", "autoscaling-api/v1")),
    ("ims", CatalogEntry::regional("ims", "v2").without_project_id()),
    ("cce", CatalogEntry::regional("cce", "api/v3/projects")),
    ("cce_addon", CatalogEntry::regional("cce", "api/v3").without_project_id()),
    ("cci", CatalogEntry::regional("cci", "apis/networking.cci.io/v1beta1").without_project_id()),
    ("cciv1", CatalogEntry::regional("cci", "api/v1").without_project_id()),
    ("cciv1_bata", CatalogEntry::regional("cci", "apis/cci/v1beta1").without_project_id()),
    ("fgs", CatalogEntry::regional("functiongraph", "v2")),
    ("swr", CatalogEntry::regional("swr-api", "v2").without_project_id()),
    // Storage
    ("evs", CatalogEntry::regional("evs", "v2")),
    ("volumev2", CatalogEntry::regional("evs", "v2")),
    ("sfs", CatalogEntry::regional("sfs", "v2")),
    ("cbr", CatalogEntry::regional("cbr", "v3")),
    ("obs", CatalogEntry::regional("obs", "").without_project_id()),
    // Network
    ("vpc", CatalogEntry::regional("vpc", "v1")),
    ("networkv2", CatalogEntry::regional("vpc", "v2.0").without_project_id()),
    ("security_group", CatalogEntry::regional("vpc", "v1")),
    ("nat", CatalogEntry::regional("nat", "v2")),
    ("elb", CatalogEntry::regional("elb", "v2")),
    ("elbv2", CatalogEntry::regional("elb", "v2.0")),
    ("elbv3", CatalogEntry::regional("elb", "v3")),
    ("loadbalancer", CatalogEntry::regional("elb", "v1.0")),
    ("vpcep", CatalogEntry::regional("vpcep", "v1")),
    // Databases and middleware
    ("rds", CatalogEntry::regional("rds", "v3")),
    ("rdsv1", CatalogEntry::regional("rds", "rds/v1")),
    ("dds", CatalogEntry::regional("dds", "v3")),
    ("dcs", CatalogEntry::regional("dcs", "v2")),
    ("dcsv1", CatalogEntry::regional("dcs", "v1.0")),
    ("dcsv2", CatalogEntry::regional("dcs", "v2")),
    ("dms", CatalogEntry::regional("dms", "v1.0")),
    ("dmsv2", CatalogEntry::regional("dms", "v2")),
    ("apig", CatalogEntry::regional("apig", "v1.0").resource_base("apigw")),
    ("apig_v2", CatalogEntry::regional("apig", "v2")),
    // Analytics, security and management
    ("mrs", CatalogEntry::regional("mrs", "v1.1")),
    ("mrsv2", CatalogEntry::regional("mrs", "v2")),
    ("dws", CatalogEntry::regional("dws", "v1.0")),
    ("css", CatalogEntry::regional("css", "v1.0")),
    ("kms", CatalogEntry::regional("kms", "v1.0")),
    ("waf", CatalogEntry::regional("waf", "v1")),
    ("cts", CatalogEntry::regional("cts", "v3")),
    ("ces", CatalogEntry::regional("ces", "V1.0")),
    ("lts", CatalogEntry::regional("lts", "v2")),
    ("smn", CatalogEntry::regional("smn", "v2").resource_base("notifications")),
];

const DERIVED_KEYS: &[(&str, &[&str])] = &[
    ("ecs", &["ecsv11", "ecsv21"]),
    ("evs", &["volumev2"]),
    ("vpc", &["networkv2", "security_group"]),
    ("elb", &["elbv2", "elbv3", "loadbalancer"]),
    ("cce", &["cce_addon"]),
    ("dms", &["dmsv2"]),
    ("dcs", &["dcsv1", "dcsv2"]),
    ("rds", &["rdsv1"]),
    ("iam", &["identity"]),
    ("bss", &["bssv2"]),
    ("apig", &["apig_v2"]),
    ("mrs", &["mrsv2"]),
    ("cci", &["cciv1", "cciv1_bata"]),
    ("dns", &["dns_region"]),
];

static BUILTIN: LazyLock<ServiceCatalog> = LazyLock::new(|| ServiceCatalog {
    entries: ENTRIES.iter().map(|(key, entry)| ((*key).to_owned(), *entry)).collect(),
    derived: DERIVED_KEYS
        .iter()
        .map(|(base, keys)| ((*base).to_owned(), keys.iter().map(|k| (*k).to_owned()).collect()))
        .collect(),
});

/// Service key to endpoint rules, plus the derived-key relation.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    entries: HashMap<String, CatalogEntry>,
    derived: HashMap<String, Vec<String>>,
}

impl ServiceCatalog {
    /// Returns the built-in catalog.
    #[must_use]
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    /// Returns a copy of this catalog with `key` set to `entry`.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, entry: CatalogEntry) -> Self {
        self.entries.insert(key.into(), entry);
        self
    }

    /// Looks up `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CatalogEntry> {
        self.entries.get(key)
    }

    /// Returns the keys that share `key`'s host and inherit its custom
    /// endpoint.
    #[must_use]
    pub fn derived_keys(&self, key: &str) -> &[String] {
        self.derived.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of service keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the catalog has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
