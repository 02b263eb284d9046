//! Tarball packaging for exports

use std::fs::File;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Pack `source` into a gzip tar at `output`, rooted at `arcname/`
///
/// Returns the size of the written archive.
pub fn pack_directory(source: &Path, arcname: &str, output: &Path) -> std::io::Result<u64> {
    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(arcname, source)?;

    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;

    Ok(file.metadata()?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::safe_extract_all;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_packed_tree_extracts_under_arcname() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        fs::create_dir_all(source.join("static")).unwrap();
        fs::write(source.join("course.xml"), "<course/>").unwrap();
        fs::write(source.join("static/logo.png"), [0u8, 1, 2]).unwrap();

        let output = temp.path().join("Demo.tar.gz");
        let size = pack_directory(&source, "Demo", &output).unwrap();
        assert!(size > 0);

        let dest = temp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        safe_extract_all(&output, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("Demo/course.xml")).unwrap(), "<course/>");
        assert_eq!(fs::read(dest.join("Demo/static/logo.png")).unwrap(), vec![0u8, 1, 2]);
    }
}
