use crate::config::Configuration;
use anyhow::Error;
use std::path::Path;
use std::str::FromStr;
use toml_edit::DocumentMut;

#[derive(Debug, Clone)]
pub struct TomlConfiguration {
    document: DocumentMut,
}

impl TomlConfiguration {
    fn load_toml<P: AsRef<Path>>(file: P) -> Result<Self, Error> {
        let document = std::fs::read_to_string(file)?;
        Self::parse_toml(&document)
    }

    fn parse_toml(toml: &str) -> Result<Self, Error> {
        let document = DocumentMut::from_str(toml)?;
        Ok(Self { document })
    }

    fn into_configuration(self) -> Result<Configuration, Error> {
        Ok(toml_edit::de::from_document(self.document)?)
    }

    pub fn load<P: AsRef<Path>>(file: P) -> Result<Configuration, Error> {
        Self::load_toml(file)?.into_configuration()
    }

    pub fn parse(toml: &str) -> Result<Configuration, Error> {
        Self::parse_toml(toml)?.into_configuration()
    }
}
