//! Descriptor fixtures built in code, so tests do not need `protoc`.
use prost_reflect::DescriptorPool;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FileDescriptorProto,
    FileDescriptorSet, MethodDescriptorProto, ServiceDescriptorProto,
};

pub fn message(name: &str, nested: Vec<DescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        nested_type: nested,
        ..Default::default()
    }
}

/// An enum with a single zero value.
pub fn enumeration(name: &str) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.to_string()),
        value: vec![EnumValueDescriptorProto {
            name: Some(format!("{}_UNSPECIFIED", name.to_uppercase())),
            number: Some(0),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// A service whose methods are given as `(name, input type, output type)`.
pub fn service(name: &str, methods: &[(&str, &str, &str)]) -> ServiceDescriptorProto {
    ServiceDescriptorProto {
        name: Some(name.to_string()),
        method: methods
            .iter()
            .map(|(name, input, output)| MethodDescriptorProto {
                name: Some(name.to_string()),
                input_type: Some(input.to_string()),
                output_type: Some(output.to_string()),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

pub fn file(
    name: &str,
    package: &str,
    messages: Vec<DescriptorProto>,
    services: Vec<ServiceDescriptorProto>,
    dependencies: &[&str],
) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: (!package.is_empty()).then(|| package.to_string()),
        dependency: dependencies.iter().map(|d| d.to_string()).collect(),
        message_type: messages,
        service: services,
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

pub fn pool(files: Vec<FileDescriptorProto>) -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: files })
        .expect("fixture descriptors are valid")
}
