//! Binary container for serialized modules.
//!
//! Layout: the eight [`MAGIC_BYTES`], followed by the borsh encoding of a
//! [`Header`] naming the crate version that wrote the payload, followed by
//! the borsh encoding of the [`Module`]. A reader accepts payloads written by
//! any version matching `^<major>.<minor>` of its own version.
use borsh::{BorshDeserialize, BorshSerialize};
use log::trace;

use crate::{modules::Module, utils::Error};

pub const MAGIC_BYTES: [u8; 8] = *b"SHIRBC\0\0";

/// Metadata written in front of the module payload.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Header {
    pub producer_version: String,
}

fn reader_requirement() -> Result<semver::VersionReq, Error> {
    let own = semver::Version::parse(env!("CARGO_PKG_VERSION"))
        .map_err(|e| Error::Deserialize(format!("invalid reader version: {}", e)))?;
    semver::VersionReq::parse(&format!("^{}.{}", own.major, own.minor))
        .map_err(|e| Error::Deserialize(format!("invalid reader requirement: {}", e)))
}

/// Encode `module` into the binary container.
pub fn write_module(module: &Module) -> Result<Vec<u8>, Error> {
    let header = Header {
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let mut buf = MAGIC_BYTES.to_vec();
    header
        .serialize(&mut buf)
        .map_err(|e| Error::Serialize(e.to_string()))?;
    module
        .serialize(&mut buf)
        .map_err(|e| Error::Serialize(e.to_string()))?;

    trace!(
        "serialized module ({} function(s)) into {} bytes",
        module.functions.len(),
        buf.len()
    );
    Ok(buf)
}

/// Decode a module previously written by [`write_module`].
pub fn read_module(bytes: &[u8]) -> Result<Module, Error> {
    let Some(mut payload) = bytes.strip_prefix(&MAGIC_BYTES[..]) else {
        return Err(Error::InvalidMagic);
    };

    let header = Header::deserialize(&mut payload).map_err(|e| Error::Deserialize(e.to_string()))?;
    let required = reader_requirement()?;
    let compatible = semver::Version::parse(&header.producer_version)
        .map(|found| required.matches(&found))
        .unwrap_or(false);
    if !compatible {
        return Err(Error::UnsupportedBytecodeVersion {
            found: header.producer_version,
            required: required.to_string(),
        });
    }

    let module = Module::deserialize(&mut payload).map_err(|e| Error::Deserialize(e.to_string()))?;
    if !payload.is_empty() {
        return Err(Error::Deserialize(format!(
            "{} trailing bytes after the module payload",
            payload.len()
        )));
    }

    trace!(
        "deserialized module with {} function(s) written by {}",
        module.functions.len(),
        header.producer_version
    );
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_foreign_data() {
        assert_eq!(read_module(b"not a module"), Err(Error::InvalidMagic));
    }

    #[test]
    fn rejects_incompatible_producer() {
        let mut buf = MAGIC_BYTES.to_vec();
        Header {
            producer_version: "99.0.0".to_string(),
        }
        .serialize(&mut buf)
        .unwrap();
        Module::default().serialize(&mut buf).unwrap();

        assert!(matches!(
            read_module(&buf),
            Err(Error::UnsupportedBytecodeVersion { .. })
        ));
    }

    #[test]
    fn empty_module_round_trips() {
        let module = Module {
            name: Some("empty".to_string()),
            functions: vec![],
        };
        let bytes = write_module(&module).unwrap();
        assert_eq!(read_module(&bytes).unwrap(), module);
    }
}
