use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::store::Database;

/// Write the whole store, gzip-compressed, replacing `path` atomically
///
/// The snapshot goes to `<path>.tmp` first and is renamed over `path` once
/// it is flushed, so a crash mid-write leaves the previous snapshot intact.
///
/// # Arguments
/// * `db` - The store to snapshot
/// * `path` - Destination file
///
/// # Returns
/// * `std::io::Result<()>` - Ok once the file is in place, or the I/O or encoding error
///
/// # Examples
/// ```no_run
/// use cabtrack::saving::save_database;
/// use cabtrack::store::Database;
///
/// let db = Database::new();
/// if let Err(e) = save_database(&db, "cabtrack.bin.gz") {
///     eprintln!("Failed to save: {}", e);
/// }
/// ```
pub fn save_database(db: &Database, path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");
    let file = File::create(&tmp)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serialize_into(&mut writer, db)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    writer.flush()?;
    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    encoder.finish()?.sync_all()?;
    fs::rename(&tmp, path)?;

    Ok(())
}

/// Read a snapshot written by [`save_database`]
///
/// # Arguments
/// * `path` - Snapshot file
///
/// # Returns
/// * `std::io::Result<Database>` - The store, or `InvalidData` if the file does not decode
pub fn load_database(path: impl AsRef<Path>) -> std::io::Result<Database> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    let db: Database = deserialize_from(&mut reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(db)
}

/// Load the store from `path`, or start empty when the file does not exist
///
/// # Arguments
/// * `path` - Snapshot file
///
/// # Returns
/// * `std::io::Result<Database>` - The loaded or empty store; any other error is passed on
///
/// # Examples
/// ```no_run
/// use cabtrack::saving::load_or_default;
///
/// let db = load_or_default("cabtrack.bin.gz").expect("unreadable snapshot");
/// println!("{} projects", db.projects().len());
/// ```
pub fn load_or_default(path: impl AsRef<Path>) -> std::io::Result<Database> {
    match load_database(&path) {
        Ok(db) => Ok(db),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Database::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewComponent, Project};

    #[test]
    fn store_survives_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cabtrack.bin.gz");

        let mut db = Database::new();
        db.create_project(Project {
            job_no: "J1".into(),
            title: "Plant room".into(),
            address: "Unit 4".into(),
        })
        .unwrap();
        db.project_mut("J1")
            .unwrap()
            .create_component(NewComponent {
                code: "SK".into(),
                name: "Socket".into(),
                lab_norm: 0.75,
                ..Default::default()
            })
            .unwrap();

        save_database(&db, &path).unwrap();
        let loaded = load_database(&path).unwrap();
        let project = loaded.project("J1").unwrap();
        assert_eq!(project.project.address, "Unit 4");
        assert_eq!(project.components()[0].lab_norm, 0.75);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = load_or_default(dir.path().join("none.bin.gz")).unwrap();
        assert!(db.projects().is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin.gz");
        std::fs::write(&path, b"not gzip").unwrap();
        assert!(load_or_default(&path).is_err());
    }
}
