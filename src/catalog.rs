//! Series catalog and ticker resolver.
//!
//! Maps friendly tickers (`"cpi_core"`) to canonical source ids
//! (`CPILFESL`) using a static table loaded once at start-up. Inputs that
//! already look like a canonical id are accepted with a synthesized
//! descriptor so callers can reach series the table doesn't list.

use std::collections::{BTreeSet, HashMap};

use crate::error::LoadError;
use crate::types::{Agency, Frequency, SeasonalAdjustment, SeriesDescriptor};

// ---------------------------------------------------------------------------
// Static table
// ---------------------------------------------------------------------------

struct CatalogRow {
    id: &'static str,
    aliases: &'static [&'static str],
    title: &'static str,
    units: &'static str,
    frequency: Frequency,
    agency: Agency,
    seasonal: SeasonalAdjustment,
    bls_id: Option<&'static str>,
}

use Agency::{Bea, Bls, FederalReserve};
use Frequency::{Monthly, Quarterly};
use SeasonalAdjustment::{NotApplicable, NotSeasonallyAdjusted, SeasonallyAdjusted};

const CATALOG: &[CatalogRow] = &[
    CatalogRow {
        id: "CPIAUCSL",
        aliases: &["cpi", "cpi_all", "cpi_all_items", "inflation", "headline_cpi"],
        title: "Consumer Price Index for All Urban Consumers: All Items",
        units: "Index 1982-1984=100",
        frequency: Monthly,
        agency: Bls,
        seasonal: SeasonallyAdjusted,
        bls_id: Some("CUSR0000SA0"),
    },
    CatalogRow {
        id: "CPIAUCNS",
        aliases: &["cpi_nsa", "cpi_all_items_nsa"],
        title: "Consumer Price Index for All Urban Consumers: All Items (NSA)",
        units: "Index 1982-1984=100",
        frequency: Monthly,
        agency: Bls,
        seasonal: NotSeasonallyAdjusted,
        bls_id: Some("CUUR0000SA0"),
    },
    CatalogRow {
        id: "CPILFESL",
        aliases: &["cpi_core", "core_cpi"],
        title: "Consumer Price Index for All Urban Consumers: All Items Less Food and Energy",
        units: "Index 1982-1984=100",
        frequency: Monthly,
        agency: Bls,
        seasonal: SeasonallyAdjusted,
        bls_id: Some("CUSR0000SA0L1E"),
    },
    CatalogRow {
        id: "CPIUFDSL",
        aliases: &["cpi_food"],
        title: "Consumer Price Index for All Urban Consumers: Food",
        units: "Index 1982-1984=100",
        frequency: Monthly,
        agency: Bls,
        seasonal: SeasonallyAdjusted,
        bls_id: Some("CUSR0000SAF1"),
    },
    CatalogRow {
        id: "CPIENGSL",
        aliases: &["cpi_energy"],
        title: "Consumer Price Index for All Urban Consumers: Energy",
        units: "Index 1982-1984=100",
        frequency: Monthly,
        agency: Bls,
        seasonal: SeasonallyAdjusted,
        bls_id: Some("CUSR0000SA0E"),
    },
    CatalogRow {
        id: "CPIHOSSL",
        aliases: &["cpi_housing"],
        title: "Consumer Price Index for All Urban Consumers: Housing",
        units: "Index 1982-1984=100",
        frequency: Monthly,
        agency: Bls,
        seasonal: SeasonallyAdjusted,
        bls_id: Some("CUSR0000SAH"),
    },
    CatalogRow {
        id: "PPIFIS",
        aliases: &["ppi", "ppi_all", "ppi_final_demand"],
        title: "Producer Price Index by Commodity: Final Demand",
        units: "Index Nov 2009=100",
        frequency: Monthly,
        agency: Bls,
        seasonal: SeasonallyAdjusted,
        bls_id: Some("WPSFD4"),
    },
    CatalogRow {
        id: "PPICOR",
        aliases: &["ppi_core"],
        title: "Producer Price Index: Final Demand Less Foods, Energy, and Trade Services",
        units: "Index Aug 2013=100",
        frequency: Monthly,
        agency: Bls,
        seasonal: SeasonallyAdjusted,
        bls_id: Some("WPSFD49116"),
    },
    CatalogRow {
        id: "PPIACO",
        aliases: &["ppi_aco", "ppi_commodities"],
        title: "Producer Price Index by Commodity: All Commodities",
        units: "Index 1982=100",
        frequency: Monthly,
        agency: Bls,
        seasonal: NotSeasonallyAdjusted,
        bls_id: Some("WPU00000000"),
    },
    CatalogRow {
        id: "UNRATE",
        aliases: &["unemployment", "unemployment_rate", "jobless_rate"],
        title: "Unemployment Rate",
        units: "Percent",
        frequency: Monthly,
        agency: Bls,
        seasonal: SeasonallyAdjusted,
        bls_id: Some("LNS14000000"),
    },
    CatalogRow {
        id: "PAYEMS",
        aliases: &["payrolls", "nonfarm_payrolls", "jobs"],
        title: "All Employees, Total Nonfarm",
        units: "Thousands of Persons",
        frequency: Monthly,
        agency: Bls,
        seasonal: SeasonallyAdjusted,
        bls_id: Some("CES0000000001"),
    },
    CatalogRow {
        id: "GDP",
        aliases: &["gdp", "nominal_gdp"],
        title: "Gross Domestic Product",
        units: "Billions of Dollars, SAAR",
        frequency: Quarterly,
        agency: Bea,
        seasonal: SeasonallyAdjusted,
        bls_id: None,
    },
    CatalogRow {
        id: "GDPC1",
        aliases: &["real_gdp", "gdp_real"],
        title: "Real Gross Domestic Product",
        units: "Billions of Chained 2017 Dollars, SAAR",
        frequency: Quarterly,
        agency: Bea,
        seasonal: SeasonallyAdjusted,
        bls_id: None,
    },
    CatalogRow {
        id: "FEDFUNDS",
        aliases: &["fedfunds", "fed_funds", "interest_rate"],
        title: "Federal Funds Effective Rate",
        units: "Percent",
        frequency: Monthly,
        agency: FederalReserve,
        seasonal: NotApplicable,
        bls_id: None,
    },
];

/// Prefixes that mark an input as already being a canonical id.
const CANONICAL_PREFIXES: &[&str] = &[
    "CPI", "PPI", "UNRATE", "GDP", "CUUR", "CUSR", "WPU", "WPS", "LNS", "CES",
];

/// Prefixes of BLS-native ids (usable directly by the BLS fetchers).
const BLS_NATIVE_PREFIXES: &[&str] = &["CUUR", "CUSR", "WPU", "WPS", "LNS", "CES"];

/// Maximum aliases listed in an `UnknownSeries` error.
pub const MAX_SUGGESTIONS: usize = 10;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Immutable series lookup built from the static table.
pub struct SeriesCatalog {
    series: Vec<SeriesDescriptor>,
    /// lower-case alias or id -> index into `series`
    index: HashMap<String, usize>,
}

impl SeriesCatalog {
    pub fn new() -> Self {
        let mut series = Vec::with_capacity(CATALOG.len());
        let mut index = HashMap::new();

        for (i, row) in CATALOG.iter().enumerate() {
            let aliases: BTreeSet<String> = row.aliases.iter().map(|a| a.to_string()).collect();
            for alias in &aliases {
                index.insert(alias.clone(), i);
            }
            index.insert(row.id.to_lowercase(), i);

            series.push(SeriesDescriptor {
                id: row.id.to_string(),
                aliases,
                title: row.title.to_string(),
                units: row.units.to_string(),
                frequency: row.frequency,
                agency: row.agency,
                seasonal_adjustment: row.seasonal,
                bls_id: row.bls_id.map(String::from),
                synthesized: false,
            });
        }

        Self { series, index }
    }

    /// Resolve a friendly name or canonical id to its descriptor.
    pub fn resolve(&self, name: &str) -> Result<SeriesDescriptor, LoadError> {
        let key = name.trim().to_lowercase();

        if let Some(&i) = self.index.get(&key) {
            return Ok(self.series[i].clone());
        }

        let upper = key.to_uppercase();
        if Self::looks_canonical(&upper) {
            return Ok(Self::synthesize(&upper));
        }

        Err(LoadError::UnknownSeries {
            input: name.trim().to_string(),
            suggestions: self.aliases().into_iter().take(MAX_SUGGESTIONS).collect(),
        })
    }

    /// All catalog descriptors, in table order.
    pub fn list(&self) -> &[SeriesDescriptor] {
        &self.series
    }

    /// Sorted list of every friendly alias.
    pub fn aliases(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .series
            .iter()
            .flat_map(|s| s.aliases.iter().cloned())
            .collect();
        all.sort();
        all
    }

    fn looks_canonical(upper: &str) -> bool {
        upper.len() > 4
            && upper.chars().all(|c| c.is_ascii_alphanumeric())
            && CANONICAL_PREFIXES.iter().any(|p| upper.starts_with(p))
    }

    fn synthesize(id: &str) -> SeriesDescriptor {
        let bls_native = BLS_NATIVE_PREFIXES.iter().any(|p| id.starts_with(p));
        let frequency = if id.starts_with("GDP") { Quarterly } else { Monthly };
        let agency = if id.starts_with("GDP") {
            Bea
        } else if bls_native || id.starts_with("CPI") || id.starts_with("PPI") || id.starts_with("UNRATE") {
            Bls
        } else {
            Agency::Unknown
        };

        SeriesDescriptor {
            id: id.to_string(),
            aliases: BTreeSet::new(),
            title: id.to_string(),
            units: String::new(),
            frequency,
            agency,
            seasonal_adjustment: NotApplicable,
            bls_id: bls_native.then(|| id.to_string()),
            synthesized: true,
        }
    }
}

impl Default for SeriesCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
