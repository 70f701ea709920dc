//! The one fixed rewrite applied to every fetched page.

use lol_html::{RewriteStrSettings, element, rewrite_str};

/// Element id of the logged-in user's menu, which is meaningless in a static mirror.
pub const USER_MENU_ID: &str = "user-menu-link";

/// Hide the user menu link so the mirror does not advertise the crawler's account.
pub fn hide_user_menu(html: &str) -> Result<String, String> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("#user-menu-link", |el| {
                el.set_attribute("style", "display:none")?;
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| err.to_string())
}
