use rgc::util::heap::backing::mount_point::find_mount_point;
use rgc::util::heap::backing::MountPoint;
use rgc::util::options::HeapBacking;
use rgc::{GcError, Options};

const MOUNTINFO: &str = "\
22 28 0:21 / /proc rw,nosuid,nodev,noexec,relatime shared:13 - proc proc rw
25 28 0:23 / /dev/shm rw,nosuid,nodev shared:4 - tmpfs tmpfs rw,inode64
26 28 0:24 / /run rw,nosuid,nodev,noexec,relatime shared:5 - tmpfs tmpfs rw,size=1624k,mode=755
27 28 0:25 / /run/user/1000 rw,nosuid,nodev,relatime shared:6 - tmpfs tmpfs rw,size=812k
40 28 0:36 / /dev/hugepages rw,relatime shared:17 - hugetlbfs hugetlbfs rw,pagesize=2M
";

fn anything(_: &str) -> bool {
    true
}

#[test]
fn single_candidate() {
    let found = find_mount_point("hugetlbfs", &[], MOUNTINFO, anything).unwrap();
    assert_eq!(found, "/dev/hugepages");
}

#[test]
fn preferred_candidate_wins() {
    let (fs, preferred) = HeapBacking::Tmpfs.filesystem().unwrap();
    let found = find_mount_point(fs, preferred, MOUNTINFO, anything).unwrap();
    assert_eq!(found, "/dev/shm");
}

#[test]
fn inaccessible_mounts_are_skipped() {
    let found = find_mount_point("tmpfs", &[], MOUNTINFO, |m: &str| m == "/run").unwrap();
    assert_eq!(found, "/run");
}

#[test]
fn ambiguous_or_missing() {
    assert!(matches!(
        find_mount_point("tmpfs", &[], MOUNTINFO, anything),
        Err(GcError::AmbiguousMountPoint { .. })
    ));
    assert!(matches!(
        find_mount_point("xfs", &[], MOUNTINFO, anything),
        Err(GcError::NoMountPoint { .. })
    ));
}

#[test]
fn explicit_location() {
    let mut options = Options::without_env();
    options.heap_backing = HeapBacking::Hugetlbfs;
    options.allocate_heap_at = "/mnt/heap".to_string();
    assert_eq!(
        MountPoint::resolve(&options).unwrap(),
        Some(MountPoint::from_path("/mnt/heap"))
    );
    options.allocate_heap_at.clear();
    options.heap_backing = HeapBacking::Anonymous;
    assert_eq!(MountPoint::resolve(&options).unwrap(), None);
}
