//! Prompt templates for every generation step.
//!
//! Templates are plain text files compiled in with `include_str!`, with
//! `{name}` placeholders filled by [`render`]. Workflow code composes them
//! with the formatted world description and the rendered response-structure
//! description from the schema registry.

pub const WORLD_DESCRIPTION: &str = include_str!("templates/world_description.txt");
pub const WORLD_IMAGE: &str = include_str!("templates/world_image.txt");
pub const CHARACTER_BATCH: &str = include_str!("templates/character_batch.txt");
pub const FIRST_BATCH_CHARACTERS: &str = include_str!("templates/first_batch_characters.txt");
pub const PREVIOUS_CHARACTERS: &str = include_str!("templates/previous_characters.txt");
pub const CHARACTER_DETAIL: &str = include_str!("templates/character_detail.txt");
pub const CHARACTER_AVATAR: &str = include_str!("templates/character_avatar.txt");
pub const POST_BATCH: &str = include_str!("templates/post_batch.txt");
pub const FIRST_BATCH_POSTS: &str = include_str!("templates/first_batch_posts.txt");
pub const PREVIOUS_POSTS: &str = include_str!("templates/previous_posts.txt");
pub const POST_DETAIL: &str = include_str!("templates/post_detail.txt");
pub const POST_IMAGE: &str = include_str!("templates/post_image.txt");

/// Substitute `{name}` placeholders.
///
/// Unknown placeholders are left in place so a template/caller mismatch is
/// visible in the generated prompt instead of silently vanishing.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_all_occurrences() {
        let rendered = render("a {x} and another {x} plus {y}", &[("x", "1"), ("y", "2")]);
        assert_eq!(rendered, "a 1 and another 1 plus 2");
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        let rendered = render("{known} {unknown}", &[("known", "v")]);
        assert_eq!(rendered, "v {unknown}");
    }

    #[test]
    fn world_description_template_has_expected_placeholders() {
        assert!(WORLD_DESCRIPTION.contains("{user_prompt}"));
        assert!(WORLD_DESCRIPTION.contains("{structure_description}"));
    }

    #[test]
    fn character_batch_template_has_expected_placeholders() {
        for placeholder in [
            "{world_description}",
            "{users_count}",
            "{posts_count}",
            "{previous_characters_info}",
            "{structure_description}",
        ] {
            assert!(
                CHARACTER_BATCH.contains(placeholder),
                "missing {placeholder}"
            );
        }
    }

    #[test]
    fn post_detail_template_has_expected_placeholders() {
        for placeholder in [
            "{world_description}",
            "{character_name}",
            "{post_topic}",
            "{post_brief}",
            "{emotional_tone}",
            "{structure_description}",
        ] {
            assert!(POST_DETAIL.contains(placeholder), "missing {placeholder}");
        }
    }

    #[test]
    fn continuation_templates_have_expected_placeholders() {
        assert!(PREVIOUS_CHARACTERS.contains("{description}"));
        assert!(PREVIOUS_CHARACTERS.contains("{count_run}"));
        assert!(FIRST_BATCH_CHARACTERS.contains("{future_users_count}"));
        assert!(PREVIOUS_POSTS.contains("{description}"));
        assert!(FIRST_BATCH_POSTS.contains("{future_posts_count}"));
    }
}
