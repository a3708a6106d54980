use std::io::{Read, Seek};
use std::path::Path;

use k2p_base::{JobId, JobSettingsMeta};
use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

const SETTINGS_XML: &str = "settings.xml";

fn is_settings_xml(name: &str) -> bool {
    Path::new(name)
        .file_name()
        .and_then(|f| f.to_str())
        .map(|f| f.eq_ignore_ascii_case(SETTINGS_XML))
        .unwrap_or(false)
}

/// Scans one `settings.xml` document for `<entry key="..." value="...">`
/// elements regardless of namespace, capturing the `factory`, `node-name`,
/// and `name` keys (spec §4.2). A malformed document yields all-`None`
/// fields rather than an error — XML well-formedness is enforced in a
/// prior pass (spec §4.4 step 7), not here.
fn scan_entries(xml: &[u8]) -> (Option<String>, Option<String>, Option<String>) {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);
    // quick-xml never resolves entities or fetches an external DTD subset,
    // so this scan is safe against XXE/entity-expansion by construction
    // (spec §4.2, §9) without any extra configuration.

    let mut factory = None;
    let mut node_name = None;
    let mut name = None;
    let mut buf = Vec::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(_) => break,
        };
        match event {
            Event::Eof => break,
            Event::Start(tag) | Event::Empty(tag) => {
                let local = local_name(tag.name().as_ref());
                if local != b"entry" {
                    buf.clear();
                    continue;
                }
                let mut key = None;
                let mut value = None;
                for attr in tag.attributes().flatten() {
                    let attr_name = local_name(attr.key.as_ref()).to_vec();
                    let Ok(attr_value) = attr.unescape_value() else { continue };
                    match attr_name.as_slice() {
                        b"key" => key = Some(attr_value.into_owned()),
                        b"value" => value = Some(attr_value.into_owned()),
                        _ => {}
                    }
                }
                if let (Some(key), Some(value)) = (key, value) {
                    match key.as_str() {
                        "factory" => factory = Some(value),
                        "node-name" => node_name = Some(value),
                        "name" => name = Some(value),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    (factory, node_name, name)
}

/// Strips any namespace prefix (`foo:bar` -> `bar`), since §4.2 requires
/// scanning `<entry>` elements "regardless of namespace".
fn local_name(qname: &[u8]) -> &[u8] {
    match qname.iter().position(|b| *b == b':') {
        Some(idx) => &qname[idx + 1..],
        None => qname,
    }
}

/// Strictly checks that a document is well-formed XML, used by the
/// Intake Service's XML pass (spec §4.4 step 7) for every `.xml` entry and
/// `workflow.knime`. Unlike [`scan_entries`], this pass does reject on
/// parse error.
pub fn check_well_formed(xml: &[u8]) -> Result<(), quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => return Ok(()),
            _ => buf.clear(),
        }
    }
}

/// Extracts a [`JobSettingsMeta`] row for every `settings.xml` entry in a
/// validated archive (spec §4.2, §3). Case-insensitive on the basename.
pub fn extract_settings_meta<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    job_id: JobId,
) -> anyhow::Result<Vec<JobSettingsMeta>> {
    let mut rows = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if !is_settings_xml(&name) {
            continue;
        }
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        let (factory, node_name, node_display_name) = scan_entries(&contents);
        rows.push(JobSettingsMeta {
            job_id,
            file_name: name.chars().take(512).collect(),
            factory,
            node_name,
            name: node_display_name,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write as _};
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buf);
            let options = FileOptions::default();
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    const SETTINGS: &[u8] = br#"<?xml version="1.0"?>
        <config>
            <entry key="factory" type="xstring" value="org.knime.Factory"/>
            <entry key="node-name" type="xstring" value="CSV Reader"/>
            <entry key="name" type="xstring" value="CSV Reader"/>
            <entry key="unrelated" type="xstring" value="ignored"/>
        </config>"#;

    #[test]
    fn extracts_factory_node_name_and_name() {
        let data = build_zip(&[
            ("workflow.knime", b"<root/>"),
            ("CSV Reader (#1)/settings.xml", SETTINGS),
        ]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let rows = extract_settings_meta(&mut archive, JobId::new()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].factory.as_deref(), Some("org.knime.Factory"));
        assert_eq!(rows[0].node_name.as_deref(), Some("CSV Reader"));
        assert_eq!(rows[0].name.as_deref(), Some("CSV Reader"));
    }

    #[test]
    fn is_case_insensitive_on_basename() {
        let data = build_zip(&[("node/SETTINGS.XML", SETTINGS)]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let rows = extract_settings_meta(&mut archive, JobId::new()).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn tolerates_malformed_xml_with_null_fields() {
        let data = build_zip(&[("node/settings.xml", b"<not-closed>")]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let rows = extract_settings_meta(&mut archive, JobId::new()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].factory.is_none());
    }

    #[test]
    fn ignores_non_settings_files() {
        let data = build_zip(&[("workflow.knime", b"<root/>"), ("README.txt", b"hi")]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let rows = extract_settings_meta(&mut archive, JobId::new()).unwrap();
        assert!(rows.is_empty());
    }
}

#[cfg(test)]
mod well_formed_tests {
    use super::check_well_formed;

    #[test]
    fn accepts_well_formed_document() {
        assert!(check_well_formed(b"<root><a/></root>").is_ok());
    }

    #[test]
    fn rejects_unclosed_tag() {
        assert!(check_well_formed(b"<root><a>").is_err());
    }
}
