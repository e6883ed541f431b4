use proc_macro::TokenStream;

use quote::quote;
use syn::{
    Attribute, Expr, ExprLit, Ident, ItemStruct, Lit, Meta, Token, parse::Parser, spanned::Spanned,
};

/// Turns a step config struct into a pipeline stage factory.
///
/// The struct must deserialize with `#[serde(default)]`, carry `enabled: bool`
/// and `label: Option<String>`, and implement
/// `fn commands(cfg: &Self, env: &crate::steps::StepEnv) -> crate::Result<Vec<crate::executor::CommandSpec>>`.
#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn Step(attr: TokenStream, item: TokenStream) -> TokenStream {
    match step_impl(attr, item) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

fn lit_str(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        _ => Err(syn::Error::new(expr.span(), "expected string literal")),
    }
}

fn lit_bool(expr: &Expr) -> syn::Result<bool> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Bool(b), ..
        }) => Ok(b.value),
        _ => Err(syn::Error::new(expr.span(), "expected bool literal")),
    }
}

fn lit_ident(expr: &Expr) -> syn::Result<Ident> {
    let raw = lit_str(expr)?;
    syn::parse_str::<Ident>(raw.trim())
        .map_err(|_| syn::Error::new(expr.span(), format!("'{raw}' is not an identifier")))
}

fn drop_our_attrs(attrs: &[Attribute]) -> Vec<Attribute> {
    attrs
        .iter()
        .filter(|a| {
            let Meta::Path(p) = &a.meta else {
                return true;
            };
            let Some(ident) = p.get_ident() else {
                return true;
            };
            ident != "Step"
        })
        .cloned()
        .collect()
}

struct StepMeta {
    id: String,
    default_label: String,
    config_path: String,
    concurrent: bool,
    stamped: bool,
    skip_if: Option<Ident>,
}

fn parse_meta(attr: TokenStream, struct_ident: &Ident) -> syn::Result<StepMeta> {
    let parser = syn::punctuated::Punctuated::<Meta, Token![,]>::parse_terminated;
    let metas = parser.parse(attr)?;

    let mut id: Option<String> = None;
    let mut default_label: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut concurrent = false;
    let mut stamped = false;
    let mut skip_if: Option<Ident> = None;

    for m in metas {
        let Meta::NameValue(nv) = m else {
            return Err(syn::Error::new(m.span(), "expected key = value"));
        };
        let Some(key) = nv.path.get_ident().map(|i| i.to_string()) else {
            return Err(syn::Error::new(nv.path.span(), "expected ident key"));
        };
        let v = &nv.value;
        match key.as_str() {
            "id" => id = Some(lit_str(v)?),
            "default_label" => default_label = Some(lit_str(v)?),
            "config_path" => config_path = Some(lit_str(v)?),
            "concurrent" => concurrent = lit_bool(v)?,
            "stamped" => stamped = lit_bool(v)?,
            "skip_if" => skip_if = Some(lit_ident(v)?),
            other => {
                return Err(syn::Error::new(
                    nv.path.span(),
                    format!("unknown Step attribute key '{other}'"),
                ));
            }
        }
    }

    let id = id.ok_or_else(|| syn::Error::new(struct_ident.span(), "Step: missing id"))?;
    if id.trim().is_empty() || id.contains('.') {
        return Err(syn::Error::new(
            struct_ident.span(),
            "Step: id must be a non-empty name without '.'",
        ));
    }
    let default_label = default_label
        .ok_or_else(|| syn::Error::new(struct_ident.span(), "Step: missing default_label"))?;
    // Default: steps.<id>
    let config_path = config_path.unwrap_or_else(|| format!("steps.{id}"));

    Ok(StepMeta {
        id,
        default_label,
        config_path,
        concurrent,
        stamped,
        skip_if,
    })
}

fn step_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut st: ItemStruct = syn::parse(item)?;
    st.attrs = drop_our_attrs(&st.attrs);
    let struct_ident = st.ident.clone();

    let meta = parse_meta(attr, &struct_ident)?;
    let id_lit = meta.id;
    let default_label_lit = meta.default_label;
    let config_path_lit = meta.config_path;
    let concurrent = meta.concurrent;

    let skip_check = match meta.skip_if {
        Some(flag) => quote! {
            if env.options.#flag {
                return Ok(None);
            }
        },
        None => quote! {},
    };

    let stamp_stmt = if meta.stamped {
        quote! {
            stage.stamp = env.stamp_guard(Self::ID);
        }
    } else {
        quote! {}
    };

    let expanded = quote! {
        #st

        impl #struct_ident {
            pub const ID: &'static str = #id_lit;
            pub const CONFIG_PATH: &'static str = #config_path_lit;
            pub const CONCURRENT: bool = #concurrent;

            pub fn load(doc: &crate::config::ConfigDoc) -> crate::Result<Self> {
                Ok(doc
                    .deserialize_path::<Self>(Self::CONFIG_PATH)?
                    .unwrap_or_default())
            }

            pub fn stage(
                doc: &crate::config::ConfigDoc,
                env: &crate::steps::StepEnv,
            ) -> crate::Result<Option<crate::planner::Stage>> {
                #skip_check

                let cfg = Self::load(doc)?;
                if !cfg.enabled {
                    return Ok(None);
                }

                let label = cfg
                    .label
                    .clone()
                    .unwrap_or_else(|| #default_label_lit.to_string());

                let commands = Self::commands(&cfg, env)?;
                if commands.is_empty() {
                    return Ok(None);
                }

                let mut stage = crate::planner::Stage::new(Self::ID, label, commands);
                stage.concurrent = Self::CONCURRENT;
                #stamp_stmt
                Ok(Some(stage))
            }

            pub fn plan(
                doc: &crate::config::ConfigDoc,
                env: &crate::steps::StepEnv,
                plan: &mut crate::planner::Plan,
            ) -> crate::Result<()> {
                if let Some(stage) = Self::stage(doc, env)? {
                    plan.add(stage)?;
                }
                Ok(())
            }
        }
    };

    Ok(expanded.into())
}
