use super::{display_or_unset, mask_secret};

#[test]
fn mask_secret_hides_every_character() {
    assert_eq!(mask_secret("hunter2"), "*******");
    assert_eq!(mask_secret("pässwörd"), "********");
    assert_eq!(mask_secret(""), "(not set)");
}

#[test]
fn unset_values_are_labelled() {
    assert_eq!(display_or_unset("   "), "(not set)");
    assert_eq!(display_or_unset("admin"), "admin");
}
