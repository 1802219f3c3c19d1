/// Declared topic taxonomy: top-level groups and their categories.
/// Group and in-group order are meaningful — they break ties during
/// per-cycle category selection and drive deterministic quota padding.
pub const CATEGORY_TREE: &[(&str, &[&str])] = &[
    (
        "financial-assets",
        &["stocks", "bonds", "etf", "rates", "forex", "derivatives"],
    ),
    (
        "digital-assets",
        &["coins", "stablecoins", "exchanges", "defi", "wallets", "chain-security"],
    ),
    (
        "consumer-goods",
        &["food", "retail", "electronics", "cosmetics", "household", "recalls"],
    ),
    (
        "real-estate",
        &["housing", "commercial", "leasing", "redevelopment", "construction", "project-finance"],
    ),
    (
        "energy-environment",
        &["power", "gas", "oil", "renewables", "carbon", "minerals"],
    ),
    (
        "industry-tech",
        &["ai", "data", "privacy", "platforms", "semiconductors", "export-controls"],
    ),
    (
        "mobility-logistics",
        &["autos", "ev", "batteries", "autonomous-driving", "aviation", "shipping"],
    ),
    (
        "public-society",
        &["tax", "labor", "health", "education", "disaster-safety", "defense"],
    ),
];

/// Top-level group owning a category, if the category is declared.
pub fn group_for(category: &str) -> Option<&'static str> {
    CATEGORY_TREE
        .iter()
        .find(|(_, members)| members.contains(&category))
        .map(|(group, _)| *group)
}

pub fn is_valid_category(category: &str) -> bool {
    group_for(category).is_some()
}

/// All declared categories in declared order.
pub fn all_categories() -> Vec<&'static str> {
    CATEGORY_TREE
        .iter()
        .flat_map(|(_, members)| members.iter().copied())
        .collect()
}
