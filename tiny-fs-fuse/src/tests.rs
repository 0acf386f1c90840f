use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

use block_dev::BlockDevice;
use tiny_fs::{
    BLOCK_SIZE, DirEntry, Directory, FileHeader, FreeMap, FsError, GROUP_CAPACITY, MAX_OPEN_FILES,
    NUM_DIRECT, TinyFileSystem,
};

use crate::BlockFile;

// 块缓存按块号全局索引，各测试串行执行并先清空缓存，
// 才能各用各的设备互不串台
fn serial() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    let guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    tiny_fs::purge();
    guard
}

fn block_file(total_blocks: u32) -> Arc<BlockFile> {
    let file = tempfile::tempfile().unwrap();
    file.set_len(total_blocks as u64 * BLOCK_SIZE as u64).unwrap();
    Arc::new(BlockFile(Mutex::new(file)))
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn record_sizes() {
    assert_eq!(32, mem::size_of::<DirEntry>());
    assert_eq!(32, DirEntry::SIZE);
}

#[test]
fn free_map_scans_lowest_first() {
    let mut free_map = FreeMap::new(128);
    assert_eq!(free_map.num_clear(), 128);

    assert_eq!(free_map.find_and_set(), Some(0));
    assert_eq!(free_map.find_and_set(), Some(1));
    free_map.mark(2);
    assert_eq!(free_map.find_and_set(), Some(3));
    assert_eq!(free_map.num_clear(), 124);

    free_map.clear(1);
    assert!(!free_map.test(1));
    assert_eq!(free_map.find_and_set(), Some(1));
    assert!(free_map.test(1));
}

#[test]
fn free_map_exhaustion() {
    let mut free_map = FreeMap::new(64);
    for expected in 0..64 {
        assert_eq!(free_map.find_and_set(), Some(expected));
    }
    assert_eq!(free_map.find_and_set(), None);
    assert_eq!(free_map.num_clear(), 0);
}

#[test]
fn header_allocate_checks_group_records_too() {
    // 128个数据块还需1块组记录，128位的位图装不下
    let mut free_map = FreeMap::new(128);
    let mut header = FileHeader::new();
    assert_eq!(
        header.allocate(&mut free_map, 128 * BLOCK_SIZE),
        Err(FsError::CapacityExceeded)
    );
    // 预检失败不得留下任何已认领的位
    assert_eq!(free_map.num_clear(), 128);
}

#[test]
fn header_allocate_deallocate_returns_to_free() {
    let mut free_map = FreeMap::new(1024);
    let mut header = FileHeader::new();
    let size = (NUM_DIRECT + GROUP_CAPACITY + 5) * BLOCK_SIZE;
    header.allocate(&mut free_map, size).unwrap();

    let data_blocks = size / BLOCK_SIZE;
    // 数据块之外还有两块组记录
    assert_eq!(free_map.num_clear(), 1024 - data_blocks - 2);

    header.deallocate(&mut free_map);
    assert_eq!(free_map.num_clear(), 1024);
    assert_eq!(header.len(), 0);
}

#[test]
fn header_block_map_unique_and_marked() {
    let mut free_map = FreeMap::new(1024);
    let mut first = FileHeader::new();
    let mut second = FileHeader::new();
    first
        .allocate(&mut free_map, (NUM_DIRECT + 10) * BLOCK_SIZE)
        .unwrap();
    second.allocate(&mut free_map, 50 * BLOCK_SIZE).unwrap();

    let mut seen = std::collections::HashSet::new();
    for header in [&first, &second] {
        for offset in (0..header.len()).step_by(BLOCK_SIZE) {
            let block_id = header.byte_to_block(offset).unwrap();
            assert!(seen.insert(block_id), "block {block_id} mapped twice");
            assert!(free_map.test(block_id));
        }
    }
}

#[test]
fn header_roundtrip_with_indirect_groups() {
    let _guard = serial();
    let device: Arc<dyn BlockDevice> = block_file(1024);

    let mut free_map = FreeMap::new(1024);
    let header_block = free_map.find_and_set().unwrap();
    let mut header = FileHeader::new();
    let size = (NUM_DIRECT + 2 * GROUP_CAPACITY + 3) * BLOCK_SIZE + 17;
    header.allocate(&mut free_map, size).unwrap();
    header.write_back(header_block, &device);

    let fetched = FileHeader::fetch_from(header_block, &device);
    assert_eq!(fetched.len(), size);
    assert_eq!(fetched.num_blocks(), size.div_ceil(BLOCK_SIZE));
    for offset in (0..size).step_by(BLOCK_SIZE) {
        assert_eq!(
            fetched.byte_to_block(offset).unwrap(),
            header.byte_to_block(offset).unwrap()
        );
    }
    assert_eq!(fetched.byte_to_block(size), Err(FsError::OutOfRange));
}

#[test]
fn directory_add_remove_find() {
    let mut dir = Directory::empty(4);
    assert_eq!(dir.find_index("a"), None);

    dir.add("a", 10, false).unwrap();
    dir.add("b", 11, true).unwrap();
    assert_eq!(dir.add("a", 12, false), Err(FsError::AlreadyExists));
    assert_eq!(dir.find("a"), Some(10));
    assert_eq!(dir.find("b"), Some(11));

    dir.remove("a").unwrap();
    assert_eq!(dir.find("a"), None);
    assert_eq!(dir.remove("a"), Err(FsError::NotFound));

    // 槽位释放后可重新绑定到新的块
    dir.add("a", 20, false).unwrap();
    assert_eq!(dir.find("a"), Some(20));

    dir.add("c", 21, false).unwrap();
    dir.add("d", 22, false).unwrap();
    assert_eq!(dir.add("e", 23, false), Err(FsError::CapacityExceeded));
}

#[test]
fn directory_names_compare_truncated() {
    let mut dir = Directory::empty(4);
    let long = "a-very-long-file-name-that-overflows";
    dir.add(long, 7, false).unwrap();

    // 超出上限的尾巴不参与比对
    assert_eq!(dir.find(&long[..23]), Some(7));
    assert_eq!(dir.find("a-very-long-file-nameXXX"), None);
    assert_eq!(dir.add(&long[..23], 8, false), Err(FsError::AlreadyExists));
}

#[test]
fn multi_byte_names_truncate_on_char_boundary() {
    let mut dir = Directory::empty(4);
    // 33字节的名字，第23字节不在字符边界上
    let long = "架构设计文档副本最终版";
    dir.add(long, 7, false).unwrap();

    // 存储形态退到21字节整字符处，仍是合法 UTF-8
    assert_eq!(dir.entry(0).name(), "架构设计文档副");
    assert_eq!(dir.find(long), Some(7));
    assert_eq!(dir.find("架构设计文档副"), Some(7));
    assert_eq!(dir.find("架构设计文"), None);
}

#[test]
fn multi_byte_name_roundtrips_through_disk() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    fs.create("/架构设计文档副本最终版", 10, false).unwrap();

    // 截断后的名字落盘、罗列、再查找都不出岔子
    let listing = fs.list("/", false).unwrap();
    assert_eq!(listing[0].path, "/架构设计文档副");
    assert_eq!(fs.open_file("/架构设计文档副本最终版").unwrap().len(), 10);
    assert_eq!(fs.open_file("/架构设计文档副").unwrap().len(), 10);
}

#[test]
fn create_write_read_back() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);

    fs.create("/hello", 1000, false).unwrap();
    let file = fs.open_file("/hello").unwrap();
    assert_eq!(file.len(), 1000);

    let data = pattern(1000);
    assert_eq!(file.write_at(0, &data), 1000);
    let mut buf = vec![0; 1000];
    assert_eq!(file.read_at(0, &mut buf), 1000);
    assert_eq!(buf, data);

    // 文件不增长：越过末尾的部分被钳掉
    assert_eq!(file.write_at(990, &[1; 20]), 10);
    assert_eq!(file.read_at(600, &mut buf), 400);
    assert_eq!(file.read_at(1000, &mut buf), 0);
}

#[test]
fn large_file_spans_indirect_groups() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);

    let size = (NUM_DIRECT + GROUP_CAPACITY + 5) * BLOCK_SIZE;
    fs.create("/big", size, false).unwrap();
    let file = fs.open_file("/big").unwrap();
    assert_eq!(file.len(), size);

    let data = pattern(size);
    assert_eq!(file.write_at(0, &data), size);
    let mut buf = vec![0; size];
    assert_eq!(file.read_at(0, &mut buf), size);
    assert_eq!(buf, data);

    // 跨越直接表/间接组边界的零散读
    let boundary = NUM_DIRECT * BLOCK_SIZE - 7;
    let mut small = [0u8; 64];
    assert_eq!(file.read_at(boundary, &mut small), 64);
    assert_eq!(small[..], data[boundary..boundary + 64]);
}

#[test]
fn search_path_resolution() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    fs.create("/a", 0, true).unwrap();
    fs.create("/a/b", 100, false).unwrap();

    // 裸根引用解析到根目录文件
    let root = fs.open_file("/").unwrap();
    assert_eq!(root.len(), 64 * DirEntry::SIZE);

    assert_eq!(fs.open_file("/a/b").unwrap().len(), 100);
    assert_eq!(fs.open_file("/a/missing").unwrap_err(), FsError::NotFound);
    // 中间分量缺失时不会试图打开不存在的目录文件
    assert_eq!(fs.open_file("/missing/b").unwrap_err(), FsError::NotFound);
    // 中间分量是普通文件同样解析失败
    fs.create("/plain", 10, false).unwrap();
    assert_eq!(fs.open_file("/plain/x").unwrap_err(), FsError::NotFound);

    assert_eq!(fs.open_file("relative").unwrap_err(), FsError::InvalidPath);
}

#[test]
fn create_under_plain_file_is_rejected() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    fs.create("/plain", 100, false).unwrap();
    let data = pattern(100);
    fs.open_file("/plain").unwrap().write_at(0, &data);
    let free_before = fs.free_blocks();

    assert_eq!(fs.create("/plain/x", 10, false), Err(FsError::NotFound));

    // 文件内容不得被当成目录表写坏
    let mut buf = vec![0; 100];
    assert_eq!(fs.open_file("/plain").unwrap().read_at(0, &mut buf), 100);
    assert_eq!(buf, data);
    assert_eq!(fs.free_blocks(), free_before);
}

#[test]
fn debug_dump_reports_usage_and_contents() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    fs.create("/a", 0, true).unwrap();
    fs.create("/a/b", 10, false).unwrap();

    let dump = format!("{fs:?}");
    assert!(dump.contains("total_blocks: 4096"));
    assert!(dump.contains(&format!("free_blocks: {}", fs.free_blocks())));
    assert!(dump.contains("/a/b"));
}

#[test]
fn duplicate_create_changes_nothing() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    fs.create("/f", 777, false).unwrap();

    let free_before = fs.free_blocks();
    let listing_before = fs.list("/", true).unwrap();

    assert_eq!(fs.create("/f", 777, false), Err(FsError::AlreadyExists));
    assert_eq!(fs.free_blocks(), free_before);
    assert_eq!(fs.list("/", true).unwrap(), listing_before);
}

#[test]
fn directory_table_full() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 2);
    fs.create("/one", 10, false).unwrap();
    fs.create("/two", 10, false).unwrap();

    let free_before = fs.free_blocks();
    assert_eq!(fs.create("/three", 10, false), Err(FsError::CapacityExceeded));
    // 失败的创建不得在盘上留下痕迹
    assert_eq!(fs.free_blocks(), free_before);
    assert_eq!(fs.open_file("/three").unwrap_err(), FsError::NotFound);
}

#[test]
fn disk_full() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(128), 128, 16);

    let free_before = fs.free_blocks();
    let too_big = (free_before + 1) * BLOCK_SIZE;
    assert_eq!(fs.create("/big", too_big, false), Err(FsError::CapacityExceeded));
    assert_eq!(fs.free_blocks(), free_before);
    assert_eq!(fs.open_file("/big").unwrap_err(), FsError::NotFound);
}

#[test]
fn remove_file_returns_blocks() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    let baseline = fs.free_blocks();

    fs.create("/f", 3 * BLOCK_SIZE, false).unwrap();
    assert_eq!(fs.free_blocks(), baseline - 4); // 3块数据 + 头块

    fs.remove("/f", false).unwrap();
    assert_eq!(fs.free_blocks(), baseline);
    assert_eq!(fs.open_file("/f").unwrap_err(), FsError::NotFound);

    assert_eq!(fs.remove("/f", false), Err(FsError::NotFound));
    assert_eq!(fs.remove("/", false), Err(FsError::InvalidPath));
}

#[test]
fn recursive_remove_frees_whole_subtree() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    let baseline = fs.free_blocks();

    fs.create("/d", 0, true).unwrap();
    fs.create("/d/f", 3 * BLOCK_SIZE, false).unwrap();
    fs.create("/d/s", 0, true).unwrap();
    fs.create("/d/s/g", 2 * BLOCK_SIZE, false).unwrap();
    assert!(fs.free_blocks() < baseline);

    fs.remove("/d", true).unwrap();
    // 子树内每个可达块都恰好归还一次
    assert_eq!(fs.free_blocks(), baseline);
    assert_eq!(fs.open_file("/d").unwrap_err(), FsError::NotFound);
}

#[test]
fn plain_remove_of_directory_frees_only_its_table() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    let baseline = fs.free_blocks();

    fs.create("/d", 0, true).unwrap();
    fs.create("/d/f", 3 * BLOCK_SIZE, false).unwrap();

    let free_before = fs.free_blocks();
    fs.remove("/d", false).unwrap();
    // 64项的表占4块，加上目录自己的头块
    assert_eq!(fs.free_blocks(), free_before + 5);
    // 子树内容没被回收，这是非递归删除的固有泄漏
    assert!(fs.free_blocks() < baseline);
}

#[test]
fn list_accumulates_prefixes() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    assert!(fs.list("/", true).unwrap().is_empty());

    fs.create("/a", 0, true).unwrap();
    fs.create("/a/b", 0, true).unwrap();
    fs.create("/a/b/c", 10, false).unwrap();
    fs.create("/x", 10, false).unwrap();

    let paths: Vec<_> = fs
        .list("/", true)
        .unwrap()
        .into_iter()
        .map(|entry| entry.path)
        .collect();
    assert_eq!(paths, ["/a", "/a/b", "/a/b/c", "/x"]);

    let shallow: Vec<_> = fs
        .list("/", false)
        .unwrap()
        .into_iter()
        .map(|entry| entry.path)
        .collect();
    assert_eq!(shallow, ["/a", "/x"]);

    let nested: Vec<_> = fs
        .list("/a", false)
        .unwrap()
        .into_iter()
        .map(|entry| entry.path)
        .collect();
    assert_eq!(nested, ["/a/b"]);

    // 罗列普通文件不是目录操作
    assert_eq!(fs.list("/x", false).unwrap_err(), FsError::NotFound);
}

#[test]
fn stat_reports_kind_and_size() {
    use tiny_fs::StatKind;

    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    fs.create("/d", 0, true).unwrap();
    fs.create("/d/f", 1000, false).unwrap();

    let root = fs.stat("/").unwrap();
    assert_eq!(root.kind, StatKind::DIR);
    assert_eq!(root.size, 64 * DirEntry::SIZE as u64);

    let dir = fs.stat("/d").unwrap();
    assert_eq!(dir.kind, StatKind::DIR);

    let file = fs.stat("/d/f").unwrap();
    assert_eq!(file.kind, StatKind::FILE);
    assert_eq!(file.size, 1000);
    assert_eq!(file.blocks, 2);

    assert_eq!(fs.stat("/nope").unwrap_err(), FsError::NotFound);
}

#[test]
fn handle_table_read_write_close() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    fs.create("/f", 1000, false).unwrap();

    let data = pattern(1000);
    let id = fs.open_id("/f").unwrap();
    // 顺序写推进游标
    assert_eq!(fs.write_id(id, &data[..600]).unwrap(), 600);
    assert_eq!(fs.write_id(id, &data[600..]).unwrap(), 400);
    fs.close_id(id).unwrap();

    let id = fs.open_id("/f").unwrap();
    let mut buf = vec![0; 700];
    assert_eq!(fs.read_id(id, &mut buf).unwrap(), 700);
    assert_eq!(buf, data[..700]);
    let mut rest = vec![0; 700];
    assert_eq!(fs.read_id(id, &mut rest).unwrap(), 300);
    assert_eq!(rest[..300], data[700..]);

    fs.close_id(id).unwrap();
    assert_eq!(fs.close_id(id), Err(FsError::NotFound));
    assert_eq!(fs.read_id(id, &mut buf), Err(FsError::NotFound));
}

#[test]
fn handle_table_capacity() {
    let _guard = serial();
    let mut fs = TinyFileSystem::format(block_file(4096), 4096, 64);
    fs.create("/f", 10, false).unwrap();

    let ids: Vec<_> = (0..MAX_OPEN_FILES)
        .map(|_| fs.open_id("/f").unwrap())
        .collect();
    assert_eq!(fs.open_id("/f"), Err(FsError::CapacityExceeded));

    // 归还的槽位会被下一次打开复用
    fs.close_id(ids[7]).unwrap();
    assert_eq!(fs.open_id("/f").unwrap(), ids[7]);
}

#[test]
fn reopen_rehydrates_from_well_known_blocks() {
    let _guard = serial();
    let device = block_file(4096);

    let mut fs = TinyFileSystem::format(device.clone(), 4096, 64);
    fs.create("/a", 0, true).unwrap();
    fs.create("/a/b", 300, false).unwrap();
    let data = pattern(300);
    fs.open_file("/a/b").unwrap().write_at(0, &data);
    let free_before = fs.free_blocks();
    drop(fs);

    let fs = TinyFileSystem::open(device);
    assert_eq!(fs.free_blocks(), free_before);
    let file = fs.open_file("/a/b").unwrap();
    let mut buf = vec![0; 300];
    assert_eq!(file.read_at(0, &mut buf), 300);
    assert_eq!(buf, data);
}
