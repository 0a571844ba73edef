use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field, Fields, Path, Type};

#[derive(Default)]
struct FieldOptions {
    skip: bool,
    readonly: bool,
    compare: Option<Path>,
}

impl FieldOptions {
    fn parse(field: &Field) -> syn::Result<Self> {
        let mut options = FieldOptions::default();
        for attr in field.attrs.iter().filter(|a| a.path().is_ident("observe")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    options.skip = true;
                    Ok(())
                } else if meta.path.is_ident("readonly") {
                    options.readonly = true;
                    Ok(())
                } else if meta.path.is_ident("compare") {
                    options.compare = Some(meta.value()?.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("expected `skip`, `readonly` or `compare = path`"))
                }
            })?;
        }
        Ok(options)
    }
}

fn is_option(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Option"),
        _ => false,
    }
}

pub(crate) fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let ident = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Observable can't be derived for generic types",
        ));
    }
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "Observable can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "Observable can only be derived for structs",
            ));
        }
    };

    let vis = &input.vis;
    let trait_ident = format_ident!("{}Fields", ident);
    let mut keys = Vec::new();
    let mut decls = Vec::new();
    let mut impls = Vec::new();

    for field in fields {
        let options = FieldOptions::parse(field)?;
        if options.skip {
            continue;
        }
        let Some(name) = field.ident.as_ref() else {
            continue;
        };
        let ty = &field.ty;
        let key = name.to_string();
        keys.push(quote! { observa::Key::from(#key) });

        let getter_doc = format!("Journaled read of `{key}`.");
        decls.push(quote! {
            #[doc = #getter_doc]
            fn #name(&self) -> #ty;
        });
        let read = match &options.compare {
            Some(compare) => quote! {
                self.read_with(#key, |this: &#ident| ::std::clone::Clone::clone(&this.#name), #compare)
            },
            None => quote! {
                self.read(#key, |this: &#ident| ::std::clone::Clone::clone(&this.#name))
            },
        };
        impls.push(quote! {
            fn #name(&self) -> #ty {
                #read
            }
        });

        if options.readonly {
            continue;
        }

        let setter = format_ident!("set_{}", name);
        let setter_doc = format!("Assign `{key}` and announce it. Returns `false` if the topic rejected the write.");
        decls.push(quote! {
            #[doc = #setter_doc]
            fn #setter(&self, value: #ty) -> bool;
        });
        impls.push(quote! {
            fn #setter(&self, value: #ty) -> bool {
                self.write(#key, move |this: &mut #ident| this.#name = value)
            }
        });

        if is_option(ty) {
            let delete = format_ident!("delete_{}", name);
            let delete_doc = format!("Set `{key}` to `None` and announce it.");
            decls.push(quote! {
                #[doc = #delete_doc]
                fn #delete(&self) -> bool;
            });
            impls.push(quote! {
                fn #delete(&self) -> bool {
                    self.write(#key, |this: &mut #ident| this.#name = ::std::option::Option::None)
                }
            });
        }
    }

    let trait_doc = format!("Observable field accessors of [`{ident}`] topics.");
    Ok(quote! {
        impl observa::Observable for #ident {
            fn keys(&self) -> ::std::vec::Vec<observa::Key> {
                ::std::vec![#(#keys),*]
            }
        }

        #[doc = #trait_doc]
        #vis trait #trait_ident {
            #(#decls)*
        }

        impl #trait_ident for observa::Topic<#ident> {
            #(#impls)*
        }
    })
}
