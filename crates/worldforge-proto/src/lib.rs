//! gRPC contract for the Worldforge downstream services.
//!
//! Message and client types for the four domain services the generation
//! pipeline writes to: World, Character, Post and Media. The modules under
//! `src/generated/` were produced from `proto/` with `tonic-build` and are
//! checked in, so building the workspace does not require `protoc`. After
//! editing a `.proto` file, regenerate the matching module and commit both.

pub mod world {
    include!("generated/world.rs");
}

pub mod character {
    include!("generated/character.rs");
}

pub mod post {
    include!("generated/post.rs");
}

pub mod media {
    include!("generated/media.rs");
}

#[cfg(test)]
mod tests {
    use super::media::MediaType;

    #[test]
    fn media_type_values_are_pinned() {
        // These values are the external contract; they must never be renumbered.
        assert_eq!(MediaType::Unknown as i32, 0);
        assert_eq!(MediaType::WorldHeader as i32, 1);
        assert_eq!(MediaType::WorldIcon as i32, 2);
        assert_eq!(MediaType::CharacterAvatar as i32, 3);
        assert_eq!(MediaType::PostImage as i32, 4);
    }

    #[test]
    fn media_type_round_trips_through_str_name() {
        for ty in [
            MediaType::Unknown,
            MediaType::WorldHeader,
            MediaType::WorldIcon,
            MediaType::CharacterAvatar,
            MediaType::PostImage,
        ] {
            assert_eq!(MediaType::from_str_name(ty.as_str_name()), Some(ty));
        }
    }
}
