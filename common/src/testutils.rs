use anyhow::Context;
use async_recursion::async_recursion;

pub async fn create_temp_dir() -> anyhow::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("treefs_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

pub async fn setup_test_dir() -> anyhow::Result<std::path::PathBuf> {
    // create a temporary directory
    let tmp_dir = create_temp_dir().await?;
    // foo
    // |- 0.txt
    // |- bar
    //    |- 1.txt
    //    |- 2.txt
    //    |- 3.txt
    // |- baz
    //    |- 4.txt
    //    |- 5.txt -> ../bar/2.txt
    //    |- 6.txt -> (absolute path) .../foo/bar/3.txt
    let foo_path = tmp_dir.join("foo");
    tokio::fs::create_dir(&foo_path).await?;
    tokio::fs::write(foo_path.join("0.txt"), "0").await?;
    let bar_path = foo_path.join("bar");
    tokio::fs::create_dir(&bar_path).await?;
    tokio::fs::write(bar_path.join("1.txt"), "1").await?;
    tokio::fs::write(bar_path.join("2.txt"), "2").await?;
    tokio::fs::write(bar_path.join("3.txt"), "3").await?;
    let baz_path = foo_path.join("baz");
    tokio::fs::create_dir(&baz_path).await?;
    tokio::fs::write(baz_path.join("4.txt"), "4").await?;
    tokio::fs::symlink("../bar/2.txt", baz_path.join("5.txt")).await?;
    tokio::fs::symlink(bar_path.join("3.txt"), baz_path.join("6.txt")).await?;
    Ok(tmp_dir)
}

/// Builds `a/x.txt` ("hello") and `a/sub/y.txt` ("world") under a fresh temp directory.
pub async fn setup_hello_world_dir() -> anyhow::Result<std::path::PathBuf> {
    let tmp_dir = create_temp_dir().await?;
    let a_path = tmp_dir.join("a");
    tokio::fs::create_dir_all(a_path.join("sub")).await?;
    tokio::fs::write(a_path.join("x.txt"), "hello").await?;
    tokio::fs::write(a_path.join("sub").join("y.txt"), "world").await?;
    Ok(tmp_dir)
}

/// Asserts that `dst` holds the same tree as `src`: same names, same node types, same file
/// contents and same symlink targets. Symlinks are compared, never followed.
#[async_recursion]
pub async fn check_dirs_identical(
    src: &std::path::Path,
    dst: &std::path::Path,
) -> anyhow::Result<()> {
    let mut src_entries = tokio::fs::read_dir(src).await?;
    let mut src_count = 0;
    while let Some(src_entry) = src_entries.next_entry().await? {
        src_count += 1;
        let src_entry_path = src_entry.path();
        let dst_entry_path = dst.join(src_entry.file_name());
        let src_md = tokio::fs::symlink_metadata(&src_entry_path)
            .await
            .with_context(|| format!("source file {:?} is missing", &src_entry_path))?;
        let dst_md = tokio::fs::symlink_metadata(&dst_entry_path)
            .await
            .with_context(|| format!("destination file {:?} is missing", &dst_entry_path))?;
        assert_eq!(src_md.file_type(), dst_md.file_type(), "{:?}", &dst_entry_path);
        if src_md.is_symlink() {
            let src_link = tokio::fs::read_link(&src_entry_path).await?;
            let dst_link = tokio::fs::read_link(&dst_entry_path).await?;
            assert_eq!(src_link, dst_link);
        } else if src_md.is_file() {
            let src_contents = tokio::fs::read(&src_entry_path).await?;
            let dst_contents = tokio::fs::read(&dst_entry_path).await?;
            assert_eq!(src_contents, dst_contents, "{:?}", &dst_entry_path);
        } else {
            check_dirs_identical(&src_entry_path, &dst_entry_path).await?;
        }
    }
    let mut dst_entries = tokio::fs::read_dir(dst).await?;
    let mut dst_count = 0;
    while dst_entries.next_entry().await?.is_some() {
        dst_count += 1;
    }
    assert_eq!(src_count, dst_count, "{:?} has extra entries", dst);
    Ok(())
}

/// Captures a tree as `(relative path, contents or link target)` pairs for before/after
/// comparisons of a tree that gets relocated.
#[async_recursion]
pub async fn snapshot_tree(
    root: &std::path::Path,
    prefix: &std::path::Path,
    out: &mut Vec<(std::path::PathBuf, Option<Vec<u8>>)>,
) -> anyhow::Result<()> {
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let relative = prefix.join(entry.file_name());
        let md = tokio::fs::symlink_metadata(&path).await?;
        if md.is_symlink() {
            let target = tokio::fs::read_link(&path).await?;
            out.push((relative, Some(target.into_os_string().into_encoded_bytes())));
        } else if md.is_file() {
            out.push((relative, Some(tokio::fs::read(&path).await?)));
        } else {
            out.push((relative.clone(), None));
            snapshot_tree(&path, &relative, out).await?;
        }
    }
    out.sort();
    Ok(())
}
