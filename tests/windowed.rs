//! Windowed-mapping integration tests: sliding reads, writes across
//! windows, and seek interaction.

use std::fs;
use std::io::SeekFrom;

use mmap_engine::{map_path, MapConfig, MmapEngineError, SyncPolicy};

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

#[test]
fn sliding_sequential_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("slide.bin");
    fs::write(&path, patterned(3072)).expect("write");

    let config = MapConfig::read_only().windowed(1024);
    let file = map_path(&path, config).expect("map");
    assert_eq!(file.window_size(), 1024);
    assert_eq!(file.window_offset(), 0);

    let mut slide_offsets = vec![0u64];
    let mut total = 0usize;
    let mut reads = 0usize;
    let mut buf = [0u8; 512];
    loop {
        let n = file.read(&mut buf).expect("read");
        if n == 0 {
            break;
        }
        reads += 1;
        for (i, byte) in buf[..n].iter().enumerate() {
            assert_eq!(*byte, ((total + i) % 256) as u8, "byte at {}", total + i);
        }
        total += n;
        let offset = file.window_offset();
        if *slide_offsets.last().expect("nonempty") != offset {
            slide_offsets.push(offset);
        }
    }

    assert_eq!(reads, 6);
    assert_eq!(total, 3072);
    // Exactly ceil(3072/1024) - 1 = 2 slide events.
    assert_eq!(slide_offsets, vec![0, 1024, 2048]);

    file.close().expect("close");
}

#[test]
fn windowed_read_at_random_offsets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("randat.bin");
    let content = patterned(10_000);
    fs::write(&path, &content).expect("write");

    let config = MapConfig::read_only().windowed(4096);
    let file = map_path(&path, config).expect("map");

    for &offset in &[9000u64, 0, 4095, 4096, 8191, 8192, 500] {
        let mut buf = [0u8; 64];
        let n = file.read_at(&mut buf, offset).expect("read_at");
        assert!(n > 0);
        assert_eq!(&buf[..n], &content[offset as usize..offset as usize + n]);
        // The cursor never moves on positional reads.
        assert_eq!(file.position(), 0);
    }

    file.close().expect("close");
}

#[test]
fn windowed_seek_and_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wseek.bin");
    let content = patterned(8192);
    fs::write(&path, &content).expect("write");

    let config = MapConfig::read_only().windowed(2048);
    let file = map_path(&path, config).expect("map");

    // Seek alone never slides the window.
    file.seek(SeekFrom::Start(6000)).expect("seek");
    assert_eq!(file.window_offset(), 0);

    // The read that follows does.
    let mut buf = [0u8; 32];
    let n = file.read(&mut buf).expect("read");
    assert_eq!(n, 32);
    assert_eq!(&buf[..], &content[6000..6032]);
    assert!(file.window_offset() > 0);

    // Seeking backwards and reading slides back.
    file.seek(SeekFrom::Start(100)).expect("seek back");
    let n = file.read(&mut buf).expect("read");
    assert_eq!(n, 32);
    assert_eq!(&buf[..], &content[100..132]);
    assert_eq!(file.window_offset(), 0);

    file.close().expect("close");
}

#[test]
fn windowed_write_and_read_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wwrite.bin");
    fs::write(&path, vec![0u8; 8192]).expect("write");

    let config = MapConfig::read_write(SyncPolicy::OnClose).windowed(2048);
    let file = map_path(&path, config).expect("map");

    // Writes in different windows; each slide flushes the previous window.
    file.write_at(b"first-window", 100).expect("write first");
    file.write_at(b"last-window", 7000).expect("write last");
    file.write_at(b"middle", 3000).expect("write middle");

    let mut buf = [0u8; 12];
    assert_eq!(file.read_at(&mut buf, 100).expect("read"), 12);
    assert_eq!(&buf, b"first-window");

    let mut buf = [0u8; 11];
    assert_eq!(file.read_at(&mut buf, 7000).expect("read"), 11);
    assert_eq!(&buf, b"last-window");

    file.close().expect("close");

    let on_disk = fs::read(&path).expect("read back");
    assert_eq!(&on_disk[100..112], b"first-window");
    assert_eq!(&on_disk[3000..3006], b"middle");
    assert_eq!(&on_disk[7000..7011], b"last-window");
}

#[test]
fn windowed_write_cannot_cross_window_boundary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wcross.bin");
    fs::write(&path, vec![0u8; 8192]).expect("write");

    let config = MapConfig::read_write(SyncPolicy::Never).windowed(2048);
    let file = map_path(&path, config).expect("map");

    // A write wholly inside a window works, straddling the boundary fails
    // with nothing written.
    assert_eq!(file.write_at(b"fits", 2044).expect("fit"), 4);
    assert!(matches!(
        file.write_at(b"straddle", 2044),
        Err(MmapEngineError::ShortWrite { .. })
    ));

    let mut buf = [0u8; 8];
    file.read_at(&mut buf, 2044).expect("read");
    assert_eq!(&buf[..4], b"fits");
    assert_eq!(&buf[4..], &[0u8; 4]);

    file.close().expect("close");
}

#[test]
fn windowed_read_never_crosses_spuriously() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wshort.bin");
    let content = patterned(3000);
    fs::write(&path, &content).expect("write");

    let config = MapConfig::read_only().windowed(1024);
    let file = map_path(&path, config).expect("map");

    // A read ending exactly at a window boundary is short, not end-of-input,
    // and the next read continues in the next window.
    file.seek(SeekFrom::Start(1000)).expect("seek");
    let mut buf = [0u8; 100];
    let n = file.read(&mut buf).expect("read to boundary");
    assert_eq!(n, 24);
    assert_eq!(&buf[..24], &content[1000..1024]);

    let n = file.read(&mut buf).expect("read past boundary");
    assert_eq!(n, 100);
    assert_eq!(&buf[..], &content[1024..1124]);

    file.close().expect("close");
}

#[test]
fn short_final_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wfinal.bin");
    // Not a multiple of the window size: the final window is short.
    let content = patterned(2500);
    fs::write(&path, &content).expect("write");

    let config = MapConfig::read_only().windowed(1024);
    let file = map_path(&path, config).expect("map");

    let mut buf = [0u8; 128];
    let n = file.read_at(&mut buf, 2450).expect("read tail");
    assert_eq!(n, 50);
    assert_eq!(&buf[..50], &content[2450..2500]);

    file.close().expect("close");
}
