/// Restricts a [`crate::load_data`] call to a subset of groups, sites, or
/// datasets by name. `None` means "no restriction"; `Some(names)` means
/// "only these" (section 4.1: "Apply filters by materializing temporary id
/// tables ... and inner-joining them into every SELECT").
#[derive(Debug, Clone, Default)]
pub struct LoadFilters {
    pub group_names: Option<Vec<String>>,
    pub site_names: Option<Vec<String>>,
    pub dataset_names: Option<Vec<String>>,
}

impl LoadFilters {
    pub fn unrestricted() -> Self {
        LoadFilters::default()
    }
}
