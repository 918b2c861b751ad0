//! Source adapters: one module per remote catalog, each translating its
//! payload into deltas applied directly to an [`Inventory`](dynamo_model::Inventory)
//! (section 4.3 of the spec). Adapters never delete entities — they upsert
//! or annotate; removal is the synchronizer's job after diffing, except
//! where the spec calls it out explicitly (the replica catalog's
//! "datasets-without-replicas" sweep).

pub mod dataset_detail;
pub mod demand_sources;
pub mod group;
pub mod phedex_xml;
pub mod replica;
pub mod site;
pub mod tape;
