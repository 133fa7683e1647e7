#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;

/// One `<object>` of a VOC fixture: label and `[xmin, ymin, xmax, ymax]`.
pub type VocObject<'a> = (&'a str, [i64; 4]);

pub fn voc_xml(file_name: &str, width: u32, height: u32, objects: &[VocObject<'_>]) -> String {
    let mut xml = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<annotation>\n  <filename>{file_name}</filename>\n  <size>\n    <width>{width}</width>\n    <height>{height}</height>\n    <depth>3</depth>\n  </size>\n"
    );
    for (name, [xmin, ymin, xmax, ymax]) in objects {
        xml.push_str(&format!(
            "  <object>\n    <name>{name}</name>\n    <bndbox>\n      <xmin>{xmin}</xmin>\n      <ymin>{ymin}</ymin>\n      <xmax>{xmax}</xmax>\n      <ymax>{ymax}</ymax>\n    </bndbox>\n  </object>\n"
        ));
    }
    xml.push_str("</annotation>\n");
    xml
}

/// Image bytes; the pipeline never decodes images, only copies and sizes them.
pub fn fake_image_bytes(seed: usize) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.extend(vec![(seed % 251) as u8; 16 + seed]);
    bytes
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, bytes).expect("write fixture file");
}

/// Writes `<stem>.jpg` and, when `objects` is given, the paired `<stem>.xml`.
pub fn write_sample(dir: &Path, stem: &str, seed: usize, objects: Option<&[VocObject<'_>]>) {
    let image_name = format!("{stem}.jpg");
    write_file(&dir.join(&image_name), &fake_image_bytes(seed));
    if let Some(objects) = objects {
        let xml = voc_xml(&image_name, 640, 480, objects);
        write_file(&dir.join(format!("{stem}.xml")), xml.as_bytes());
    }
}

pub fn write_zip(path: &Path, entries: &[(String, Vec<u8>)]) {
    let file = fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer.start_file(name.as_str(), options).expect("start entry");
        writer.write_all(bytes).expect("write entry");
    }
    writer.finish().expect("finish zip");
}

/// Builds the ZIP used by the end-to-end tests:
/// - `img_0..img_5`: one `dog` box each (`img_1` also a `cat`)
/// - `orphan`: image without annotation
/// - `flat`: annotation whose only box is degenerate
pub fn sample_upload_entries() -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    for i in 0..6 {
        let stem = format!("img_{i}");
        let mut objects: Vec<VocObject<'_>> = vec![("dog", [10, 20, 110, 220])];
        if i == 1 {
            objects.push(("cat", [0, 0, 64, 48]));
        }
        entries.push((format!("{stem}.jpg"), fake_image_bytes(i)));
        entries.push((
            format!("{stem}.xml"),
            voc_xml(&format!("{stem}.jpg"), 640, 480, &objects).into_bytes(),
        ));
    }
    entries.push(("orphan.jpg".to_string(), fake_image_bytes(99)));
    entries.push(("flat.jpg".to_string(), fake_image_bytes(7)));
    entries.push((
        "flat.xml".to_string(),
        voc_xml("flat.jpg", 640, 480, &[("dog", [50, 50, 50, 90])]).into_bytes(),
    ));
    entries
}
