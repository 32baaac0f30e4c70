use axum::response::Html;
use handlebars::Handlebars;
use serde::Serialize;

use crate::error::AppError;

/// Templates compiled into the binary: (name, source)
const TEMPLATES: &[(&str, &str)] = &[
    ("index", include_str!("../views/index.hbs")),
    ("dashboard", include_str!("../views/dashboard.hbs")),
];

const PARTIALS: &[(&str, &str)] = &[("head", include_str!("../views/partials/head.hbs"))];

/// Page renderer: template name plus data in, HTML out.
pub struct Views {
    registry: Handlebars<'static>,
}

impl Views {
    /// Compile all templates. Syntax errors surface here, at startup.
    pub fn new() -> Result<Self, AppError> {
        let mut registry = Handlebars::new();

        for (name, source) in PARTIALS {
            registry.register_partial(name, *source)?;
        }
        for (name, source) in TEMPLATES {
            registry.register_template_string(name, *source)?;
        }

        Ok(Self { registry })
    }

    /// Render the template `name` with `data`
    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<Html<String>, AppError> {
        Ok(Html(self.registry.render(name, data)?))
    }
}
