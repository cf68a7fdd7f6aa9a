use std::collections::HashSet;

use shared::domain::Marker;

/// Which markers are shown: everything, or a single country.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FilterSelection {
    #[default]
    All,
    Country(String),
}

impl FilterSelection {
    pub fn matches(&self, marker: &Marker) -> bool {
        match self {
            FilterSelection::All => true,
            FilterSelection::Country(country) => marker.country == *country,
        }
    }
}

/// Distinct non-empty countries in first-seen order, for the selector UI.
pub fn distinct_countries(markers: &[Marker]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut countries = Vec::new();
    for marker in markers {
        if marker.country.trim().is_empty() {
            continue;
        }
        if seen.insert(marker.country.clone()) {
            countries.push(marker.country.clone());
        }
    }
    countries
}

/// The order-preserving subset of `markers` matching `selection`.
pub fn visible(markers: &[Marker], selection: &FilterSelection) -> Vec<Marker> {
    markers
        .iter()
        .filter(|marker| selection.matches(marker))
        .cloned()
        .collect()
}
