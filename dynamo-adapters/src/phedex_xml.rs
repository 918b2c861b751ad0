//! The XML catalog shape section 6 documents for `subscribe`/`delete`
//! payloads:
//! `<data version="2.0"><dbs name="…"><dataset name is-open is-transient>
//! <block name is-open>(<file name bytes checksum/>)*</block>…</dataset>…</dbs></data>`.
//!
//! Section 8's round-trip property requires the parser to reproduce the
//! writer's input exactly, including `is_open` flags — we keep one plain
//! Rust model (`CatalogFile`/`CatalogBlock`/`CatalogDataset`) and two pure
//! functions (`write`/`read`) rather than hand-rolling a string builder.

use dynamo_errors::{DynamoError, DynamoResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFile {
    pub name: String,
    pub bytes: u64,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogBlock {
    pub name: String,
    pub is_open: bool,
    pub files: Vec<CatalogFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDataset {
    pub name: String,
    pub is_open: bool,
    pub is_transient: bool,
    pub blocks: Vec<CatalogBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "data")]
struct XmlData {
    #[serde(rename = "@version")]
    version: String,
    dbs: Vec<XmlDbs>,
}

#[derive(Debug, Serialize, Deserialize)]
struct XmlDbs {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "dataset", default)]
    datasets: Vec<XmlDataset>,
}

#[derive(Debug, Serialize, Deserialize)]
struct XmlDataset {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@is-open")]
    is_open: YesNo,
    #[serde(rename = "@is-transient")]
    is_transient: YesNo,
    #[serde(rename = "block", default)]
    blocks: Vec<XmlBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
struct XmlBlock {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@is-open")]
    is_open: YesNo,
    #[serde(rename = "file", default)]
    files: Vec<XmlFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct XmlFile {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@bytes")]
    bytes: u64,
    #[serde(rename = "@checksum", skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

/// `y`/`n` wire encoding used throughout phedex-shaped XML booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct YesNo(bool);

impl Serialize for YesNo {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if self.0 { "y" } else { "n" })
    }
}

impl<'de> Deserialize<'de> for YesNo {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(YesNo(s == "y"))
    }
}

/// Serializes `{dataset -> blocks}` into the documented XML shape for one
/// `dbs` element named `dbs_name`.
pub fn write(dbs_name: &str, datasets: &[CatalogDataset]) -> DynamoResult<String> {
    let doc = XmlData {
        version: "2.0".to_string(),
        dbs: vec![XmlDbs {
            name: dbs_name.to_string(),
            datasets: datasets.iter().map(to_xml_dataset).collect(),
        }],
    };
    quick_xml::se::to_string(&doc).map_err(|e| DynamoError::parse("xml catalog write", e.to_string()))
}

/// Parses a document written by [`write`] back into `(dbs_name, datasets)`.
pub fn read(xml: &str) -> DynamoResult<(String, Vec<CatalogDataset>)> {
    let doc: XmlData = quick_xml::de::from_str(xml).map_err(|e| DynamoError::parse("xml catalog read", e.to_string()))?;
    let dbs = doc.dbs.into_iter().next().ok_or_else(|| DynamoError::parse("xml catalog read", "missing dbs element"))?;
    Ok((dbs.name, dbs.datasets.into_iter().map(from_xml_dataset).collect()))
}

fn to_xml_dataset(d: &CatalogDataset) -> XmlDataset {
    XmlDataset {
        name: d.name.clone(),
        is_open: YesNo(d.is_open),
        is_transient: YesNo(d.is_transient),
        blocks: d
            .blocks
            .iter()
            .map(|b| XmlBlock {
                name: b.name.clone(),
                is_open: YesNo(b.is_open),
                files: b
                    .files
                    .iter()
                    .map(|f| XmlFile { name: f.name.clone(), bytes: f.bytes, checksum: f.checksum.clone() })
                    .collect(),
            })
            .collect(),
    }
}

fn from_xml_dataset(d: XmlDataset) -> CatalogDataset {
    CatalogDataset {
        name: d.name,
        is_open: d.is_open.0,
        is_transient: d.is_transient.0,
        blocks: d
            .blocks
            .into_iter()
            .map(|b| CatalogBlock {
                name: b.name,
                is_open: b.is_open.0,
                files: b.files.into_iter().map(|f| CatalogFile { name: f.name, bytes: f.bytes, checksum: f.checksum }).collect(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_dataset_block_file_shape() {
        let datasets = vec![CatalogDataset {
            name: "/A/B/C".to_string(),
            is_open: true,
            is_transient: false,
            blocks: vec![CatalogBlock {
                name: "/A/B/C#abcd-1234".to_string(),
                is_open: false,
                files: vec![
                    CatalogFile { name: "file1.root".to_string(), bytes: 1024, checksum: Some("cksum:123".to_string()) },
                    CatalogFile { name: "file2.root".to_string(), bytes: 2048, checksum: None },
                ],
            }],
        }];

        let xml = write("dbs-prod", &datasets).expect("writes");
        let (dbs_name, round_tripped) = read(&xml).expect("parses");
        assert_eq!(dbs_name, "dbs-prod");
        assert_eq!(round_tripped, datasets);
    }

    #[test]
    fn preserves_is_open_flags_through_round_trip() {
        let datasets = vec![CatalogDataset {
            name: "/X/Y/Z".to_string(),
            is_open: false,
            is_transient: true,
            blocks: vec![CatalogBlock { name: "/X/Y/Z#b1".to_string(), is_open: true, files: vec![] }],
        }];
        let xml = write("dbs-prod", &datasets).unwrap();
        let (_, round_tripped) = read(&xml).unwrap();
        assert!(!round_tripped[0].is_open);
        assert!(round_tripped[0].blocks[0].is_open);
    }
}
