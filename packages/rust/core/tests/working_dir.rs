//! Working-directory handling changes process-wide state, so it runs in its
//! own test binary.

use knitwork_core::WorkingDirGuard;

#[test]
fn working_dir_guard_restores_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let before = std::env::current_dir().unwrap();
    {
        let _guard = WorkingDirGuard::enter(dir.path()).unwrap();
        assert_eq!(
            std::env::current_dir().unwrap().canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
    assert_eq!(std::env::current_dir().unwrap(), before);
}
