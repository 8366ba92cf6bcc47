//! Utilities for input/output.

use anyhow::{Context, Result};
use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::Path,
};

/// Creates any directories missing in order for the given file path to be
/// valid.
pub fn create_parent_directories(file_path: impl AsRef<Path>) -> io::Result<()> {
    match file_path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Creates the file at the given path, as well as any missing parent
/// directories.
pub fn create_file_and_required_directories(file_path: impl AsRef<Path>) -> io::Result<File> {
    create_parent_directories(&file_path)?;
    File::create(file_path)
}

/// Reads and returns the content of the specified text file.
pub fn read_text_file(file_path: impl AsRef<Path>) -> io::Result<String> {
    let mut text = String::new();
    BufReader::new(File::open(file_path)?).read_to_string(&mut text)?;
    Ok(text)
}

/// Saves the given byte buffer directly as a binary file at the given path.
pub fn save_data_as_binary(
    output_file_path: impl AsRef<Path>,
    byte_buffer: &[u8],
) -> Result<()> {
    let output_file_path = output_file_path.as_ref();
    let mut file = create_file_and_required_directories(output_file_path)
        .with_context(|| format!("Could not create {}", output_file_path.display()))?;
    file.write_all(byte_buffer)
        .with_context(|| format!("Could not write to {}", output_file_path.display()))
}

/// Reads the entire binary file at the given path.
pub fn read_binary_file(file_path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let file_path = file_path.as_ref();
    let mut bytes = Vec::new();
    File::open(file_path)
        .and_then(|file| BufReader::new(file).read_to_end(&mut bytes))
        .with_context(|| format!("Could not read {}", file_path.display()))?;
    Ok(bytes)
}

/// Reads the RON (Rusty Object Notation) file at the given path and
/// deserializes the contents into an object of type `T`.
#[cfg(feature = "ron")]
pub fn parse_ron_file<T>(file_path: impl AsRef<Path>) -> Result<T>
where
    T: for<'de> serde::de::Deserialize<'de>,
{
    let file_path = file_path.as_ref();

    let text = read_text_file(file_path)
        .with_context(|| format!("Could not open {}", file_path.display()))?;

    parse_ron_str(&text).with_context(|| format!("Invalid syntax in {}", file_path.display()))
}

/// Deserializes the given RON (Rusty Object Notation) text into an object of
/// type `T`.
#[cfg(feature = "ron")]
pub fn parse_ron_str<T>(text: &str) -> Result<T>
where
    T: for<'de> serde::de::Deserialize<'de>,
{
    Ok(ron::from_str::<T>(text)?)
}

