//! The compressed descriptor embedded in every generated file.
//!
//! Servers and JSON clients need the message descriptors at run time to transcode JSON.
//! Each generated file therefore carries a gzip-compressed `FileDescriptorSet` holding its
//! proto file and every file it transitively imports, dependencies first, with source code
//! info stripped.
use flate2::Compression;
use flate2::write::GzEncoder;
use prost::Message;
use prost_reflect::FileDescriptor;
use prost_types::FileDescriptorSet;
use sha2::{Digest, Sha256};
use std::io::{self, Write};

/// Identifies one generation run: a hash over the names of the generated files.
pub fn files_hash<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_ref().as_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}

/// `file` and its transitive dependencies, dependencies first.
pub fn file_set(file: &FileDescriptor) -> FileDescriptorSet {
    let mut ordered = Vec::new();
    collect_dependencies(file, &mut ordered);

    let file = ordered
        .iter()
        .map(|f| {
            let mut proto = f.file_descriptor_proto().clone();
            proto.source_code_info = None;
            proto
        })
        .collect();
    FileDescriptorSet { file }
}

fn collect_dependencies(file: &FileDescriptor, ordered: &mut Vec<FileDescriptor>) {
    if ordered.contains(file) {
        return;
    }
    for dep in file.dependencies() {
        collect_dependencies(&dep, ordered);
    }
    ordered.push(file.clone());
}

pub fn embedded_descriptor(file: &FileDescriptor) -> io::Result<Vec<u8>> {
    let encoded = file_set(file).encode_to_vec();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&encoded)?;
    encoder.finish()
}

/// Renders `bytes` as lines of at most 16 byte literals.
pub fn byte_lines(bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(16)
        .map(|chunk| {
            chunk
                .iter()
                .map(|b| format!("0x{b:02x},"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{file, message, pool, service};
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;
    use prost_types::SourceCodeInfo;
    use std::io::Read;

    #[test]
    fn test_files_hash_is_stable() {
        let a = files_hash(["a.proto", "b.proto"]);
        assert_eq!(a.len(), 32);
        assert_eq!(a, files_hash(vec!["a.proto".to_string(), "b.proto".to_string()]));
        assert_ne!(a, files_hash(["b.proto", "a.proto"]));
    }

    #[test]
    fn test_embedded_descriptor_contains_dependencies() {
        let mut svc = file(
            "svc.proto",
            "svc",
            vec![message("Req", vec![])],
            vec![service("Svc", &[("Get", ".svc.Req", ".common.Id")])],
            &["common.proto"],
        );
        svc.source_code_info = Some(SourceCodeInfo::default());
        let pool = pool(vec![
            file("common.proto", "common", vec![message("Id", vec![])], vec![], &[]),
            svc,
        ]);
        let svc = pool.get_file_by_name("svc.proto").unwrap();

        let compressed = embedded_descriptor(&svc).unwrap();
        let mut encoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut encoded)
            .unwrap();
        let set = FileDescriptorSet::decode(encoded.as_slice()).unwrap();

        let names: Vec<_> = set.file.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["common.proto", "svc.proto"]);
        assert!(set.file.iter().all(|f| f.source_code_info.is_none()));
    }

    #[test]
    fn test_byte_lines() {
        let bytes: Vec<u8> = (0..20).collect();
        let lines = byte_lines(&bytes);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0x00, 0x01,"));
        assert_eq!(lines[1], "0x10, 0x11, 0x12, 0x13,");
    }
}
