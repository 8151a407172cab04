//! # UI Surface Binder
//!
//! Keeps every auth-dependent region of the page in line with the current
//! [`SessionFact`].
//!
//! - Bindings are typed by [`SurfaceKind`] and resolved against the live
//!   document on every apply, so markup added later is picked up
//! - Renderers set absolute state (hidden, text, attributes), never toggle.
//!   Applying the same fact twice leaves the document as applying it once.
//! - Missing profile fields render as placeholders, never as blanks
//! - A page without a login control or profile container gets minimal fallback
//!   elements. Construction is best effort and only ever logs.
use std::{collections::HashSet, sync::Arc};

use tracing::{debug, warn};

use crate::{
    config::Selectors,
    dom::{Document, ElementSpec, NodeId},
    error::BinderError,
    models::SessionFact,
    utils::{avatar_or_default, display_name_or_default},
};

pub const FALLBACK_LOGIN: &str = "auth-fallback-login";
pub const FALLBACK_PROFILE: &str = "auth-fallback-profile";
pub const FALLBACK_NAME: &str = "auth-fallback-name";
pub const FALLBACK_AVATAR: &str = "auth-fallback-avatar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    LoginControl,
    LogoutControl,
    ProfileContainer,
    NameField,
    AvatarField,
}

pub type Renderer =
    Arc<dyn Fn(&mut dyn Document, NodeId, &SessionFact) -> Result<(), BinderError> + Send + Sync>;

#[derive(Clone)]
pub struct UiSurfaceBinding {
    kind: SurfaceKind,
    selector: String,
    renderer: Renderer,
}

impl UiSurfaceBinding {
    pub fn new<I, S>(kind: SurfaceKind, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selector = selectors
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            kind,
            selector,
            renderer: default_renderer(kind),
        }
    }

    /// Replaces the default renderer. Custom renderers must stay idempotent.
    pub fn with_renderer<F>(mut self, renderer: F) -> Self
    where
        F: Fn(&mut dyn Document, NodeId, &SessionFact) -> Result<(), BinderError>
            + Send
            + Sync
            + 'static,
    {
        self.renderer = Arc::new(renderer);
        self
    }
}

fn default_renderer(kind: SurfaceKind) -> Renderer {
    match kind {
        SurfaceKind::LoginControl => Arc::new(render_login),
        SurfaceKind::LogoutControl => Arc::new(render_logout),
        SurfaceKind::ProfileContainer => Arc::new(render_profile),
        SurfaceKind::NameField => Arc::new(render_name),
        SurfaceKind::AvatarField => Arc::new(render_avatar),
    }
}

fn render_login(doc: &mut dyn Document, node: NodeId, fact: &SessionFact) -> Result<(), BinderError> {
    doc.set_hidden(node, fact.is_authenticated())
}

fn render_logout(doc: &mut dyn Document, node: NodeId, fact: &SessionFact) -> Result<(), BinderError> {
    doc.set_hidden(node, !fact.is_authenticated())
}

fn render_profile(doc: &mut dyn Document, node: NodeId, fact: &SessionFact) -> Result<(), BinderError> {
    doc.set_hidden(node, !fact.is_authenticated())?;
    doc.set_attribute(node, "data-user-id", fact.user_id().unwrap_or(""))
}

fn render_name(doc: &mut dyn Document, node: NodeId, fact: &SessionFact) -> Result<(), BinderError> {
    let name = fact.user().and_then(|user| user.display_name.as_deref());

    doc.set_text(node, &display_name_or_default(name))
}

fn render_avatar(doc: &mut dyn Document, node: NodeId, fact: &SessionFact) -> Result<(), BinderError> {
    let user = fact.user();
    let avatar = user.and_then(|user| user.avatar_url.as_deref());
    let name = user.and_then(|user| user.display_name.as_deref());

    doc.set_attribute(node, "src", &avatar_or_default(avatar))?;
    doc.set_attribute(node, "alt", &display_name_or_default(name))
}

pub struct Binder {
    document: Box<dyn Document>,
    bindings: Vec<UiSurfaceBinding>,
    login_href: String,
    fallback_failed: HashSet<SurfaceKind>,
}

impl Binder {
    pub fn new(document: Box<dyn Document>, login_href: impl Into<String>) -> Self {
        Self {
            document,
            bindings: Vec::new(),
            login_href: login_href.into(),
            fallback_failed: HashSet::new(),
        }
    }

    pub fn with_selectors(
        document: Box<dyn Document>,
        login_href: impl Into<String>,
        selectors: &Selectors,
    ) -> Self {
        let mut binder = Self::new(document, login_href);

        binder.register(UiSurfaceBinding::new(SurfaceKind::LoginControl, &selectors.login));
        binder.register(UiSurfaceBinding::new(SurfaceKind::LogoutControl, &selectors.logout));
        binder.register(UiSurfaceBinding::new(SurfaceKind::ProfileContainer, &selectors.profile));
        binder.register(UiSurfaceBinding::new(SurfaceKind::NameField, &selectors.name));
        binder.register(UiSurfaceBinding::new(SurfaceKind::AvatarField, &selectors.avatar));

        binder
    }

    pub fn register(&mut self, binding: UiSurfaceBinding) {
        debug!("Registered {:?} binding `{}`", binding.kind, binding.selector);
        self.bindings.push(binding);
    }

    /// Whether any binding of `kind` currently resolves to at least one node.
    pub fn has_binding(&self, kind: SurfaceKind) -> bool {
        self.bindings
            .iter()
            .filter(|binding| binding.kind == kind)
            .any(|binding| !self.document.query_all(&binding.selector).is_empty())
    }

    pub fn apply_current_fact(&mut self, fact: &SessionFact) {
        self.ensure_fallbacks();

        let document = self.document.as_mut();
        for binding in &self.bindings {
            for node in document.query_all(&binding.selector) {
                if let Err(e) = (binding.renderer)(document, node, fact) {
                    warn!("Rendering {:?} node {node} failed: {e}", binding.kind);
                }
            }
        }
    }

    fn ensure_fallbacks(&mut self) {
        if !self.has_binding(SurfaceKind::LoginControl)
            && !self.fallback_failed.contains(&SurfaceKind::LoginControl)
        {
            match self.build_login_control() {
                Ok(()) => debug!("Built fallback login control"),
                Err(e) => {
                    warn!("Could not build fallback login control: {e}");
                    self.fallback_failed.insert(SurfaceKind::LoginControl);
                }
            }
        }

        if !self.has_binding(SurfaceKind::ProfileContainer)
            && !self.fallback_failed.contains(&SurfaceKind::ProfileContainer)
        {
            match self.build_profile_container() {
                Ok(()) => debug!("Built fallback profile container"),
                Err(e) => {
                    warn!("Could not build fallback profile container: {e}");
                    self.fallback_failed.insert(SurfaceKind::ProfileContainer);
                }
            }
        }
    }

    fn build_login_control(&mut self) -> Result<(), BinderError> {
        let node = self.document.create_element(&ElementSpec {
            tag: "a",
            classes: &[FALLBACK_LOGIN],
            attributes: &[("href", self.login_href.as_str())],
            parent: None,
            hidden: false,
        })?;
        self.document.set_text(node, "Log in")?;

        self.register(UiSurfaceBinding::new(
            SurfaceKind::LoginControl,
            &[format!(".{FALLBACK_LOGIN}")],
        ));

        Ok(())
    }

    fn build_profile_container(&mut self) -> Result<(), BinderError> {
        let container = self.document.create_element(&ElementSpec {
            tag: "div",
            classes: &[FALLBACK_PROFILE],
            attributes: &[],
            parent: None,
            hidden: true,
        })?;
        self.register(UiSurfaceBinding::new(
            SurfaceKind::ProfileContainer,
            &[format!(".{FALLBACK_PROFILE}")],
        ));

        // children are optional; a bare container still shows and hides
        let children = [
            ("img", FALLBACK_AVATAR, SurfaceKind::AvatarField),
            ("span", FALLBACK_NAME, SurfaceKind::NameField),
        ];
        for (tag, class, kind) in children {
            let created = self.document.create_element(&ElementSpec {
                tag,
                classes: &[class],
                attributes: &[],
                parent: Some(container),
                hidden: false,
            });

            match created {
                Ok(_) => self.register(UiSurfaceBinding::new(kind, &[format!(".{class}")])),
                Err(e) => warn!("Could not build fallback {kind:?}: {e}"),
            }
        }

        Ok(())
    }
}
