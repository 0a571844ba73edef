use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{
    FnArg, Ident, ImplItem, ImplItemFn, ItemImpl, LitStr, Pat, ReturnType, Type, Visibility,
    parse::ParseStream, punctuated::Punctuated,
};

enum Receiver {
    Shared,
    Exclusive,
}

#[derive(Default)]
struct MethodOptions {
    skip: bool,
    changes: Option<Vec<String>>,
}

impl MethodOptions {
    fn take(method: &mut ImplItemFn) -> syn::Result<Self> {
        let mut options = MethodOptions::default();
        let mut error = None;
        method.attrs.retain(|attr| {
            if !attr.path().is_ident("trap") {
                return true;
            }
            let parsed = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    options.skip = true;
                    Ok(())
                } else if meta.path.is_ident("changes") {
                    let content;
                    syn::parenthesized!(content in meta.input);
                    let keys = Punctuated::<String, syn::Token![,]>::parse_terminated_with(&content, change_key)?;
                    options.changes = Some(keys.into_iter().collect());
                    Ok(())
                } else {
                    Err(meta.error("expected `skip` or `changes(..)`"))
                }
            });
            if let Err(err) = parsed {
                error.get_or_insert(err);
            }
            false
        });
        match error {
            Some(err) => Err(err),
            None => Ok(options),
        }
    }
}

/// A changed key, as a field name or a string literal.
fn change_key(input: ParseStream) -> syn::Result<String> {
    if input.peek(LitStr) {
        Ok(input.parse::<LitStr>()?.value())
    } else {
        Ok(input.parse::<Ident>()?.to_string())
    }
}

fn receiver(method: &ImplItemFn) -> Option<Receiver> {
    match method.sig.inputs.first() {
        Some(FnArg::Receiver(recv)) if recv.reference.is_some() => Some(match recv.mutability {
            Some(_) => Receiver::Exclusive,
            None => Receiver::Shared,
        }),
        _ => None,
    }
}

fn self_ident(ty: &Type) -> syn::Result<&Ident> {
    match ty {
        Type::Path(path) if path.qself.is_none() => path
            .path
            .segments
            .last()
            .map(|segment| &segment.ident)
            .ok_or_else(|| syn::Error::new_spanned(ty, "expected a type name")),
        _ => Err(syn::Error::new_spanned(ty, "#[traps] needs an impl block of a named type")),
    }
}

pub(crate) fn expand(attr: TokenStream, mut item: ItemImpl) -> syn::Result<TokenStream> {
    let vis: Visibility = if attr.is_empty() {
        syn::parse_quote!(pub)
    } else {
        syn::parse2(attr)?
    };
    if item.trait_.is_some() {
        return Err(syn::Error::new_spanned(&item, "#[traps] only applies to inherent impl blocks"));
    }
    if !item.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&item.generics, "#[traps] doesn't support generic impl blocks"));
    }

    let self_ty = item.self_ty.clone();
    let trait_ident = format_ident!("{}Traps", self_ident(&self_ty)?);
    let mut decls = Vec::new();
    let mut impls = Vec::new();

    for impl_item in item.items.iter_mut() {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        let options = MethodOptions::take(method)?;
        if options.skip {
            continue;
        }
        let Some(receiver) = receiver(method) else {
            continue;
        };
        if !method.sig.generics.params.is_empty() {
            return Err(syn::Error::new_spanned(
                &method.sig.generics,
                "trapped methods can't be generic, mark it #[trap(skip)]",
            ));
        }
        if method.sig.asyncness.is_some() {
            return Err(syn::Error::new_spanned(
                method.sig.fn_token,
                "trapped methods can't be async, mark it #[trap(skip)]",
            ));
        }

        let name = &method.sig.ident;
        let key = name.to_string();
        let mut args = Vec::new();
        let mut tys = Vec::new();
        for (index, input) in method.sig.inputs.iter().skip(1).enumerate() {
            let FnArg::Typed(typed) = input else {
                continue;
            };
            if let Type::Reference(reference) = typed.ty.as_ref() {
                return Err(syn::Error::new_spanned(
                    reference,
                    "trapped methods take owned arguments, mark it #[trap(skip)]",
                ));
            }
            let arg = match typed.pat.as_ref() {
                Pat::Ident(pat) if pat.by_ref.is_none() && pat.subpat.is_none() => pat.ident.clone(),
                _ => format_ident!("arg{}", index),
            };
            args.push(arg);
            tys.push(typed.ty.as_ref().clone());
        }
        let output = match &method.sig.output {
            ReturnType::Default => quote! { () },
            ReturnType::Type(_, ty) => quote! { #ty },
        };
        let docs = method.attrs.iter().filter(|attr| attr.path().is_ident("doc"));

        match receiver {
            Receiver::Shared => {
                decls.push(quote! {
                    #(#docs)*
                    fn #name(&self, #(#args: #tys),*) -> #output;
                });
                impls.push(quote! {
                    fn #name(&self, #(#args: #tys),*) -> #output {
                        let method = observa::Query::new(
                            #key,
                            |this: &#self_ty, (#(#args,)*): (#(#tys,)*)| <#self_ty>::#name(this, #(#args),*),
                        );
                        self.query(&method, (#(#args,)*))
                    }
                });
            }
            Receiver::Exclusive => {
                let build = match &options.changes {
                    Some(changes) => quote! {
                        observa::Command::with_changes(
                            #key,
                            ::std::vec![#(observa::Key::from(#changes)),*],
                            |this: &mut #self_ty, (#(#args,)*): (#(#tys,)*)| <#self_ty>::#name(this, #(#args),*),
                        )
                    },
                    None => quote! {
                        observa::Command::new(
                            #key,
                            |this: &mut #self_ty, (#(#args,)*): (#(#tys,)*)| <#self_ty>::#name(this, #(#args),*),
                        )
                    },
                };
                decls.push(quote! {
                    #(#docs)*
                    fn #name(&self, #(#args: #tys),*) -> observa::Result<#output>;
                });
                impls.push(quote! {
                    fn #name(&self, #(#args: #tys),*) -> observa::Result<#output> {
                        let method = #build;
                        self.command(&method, (#(#args,)*))
                    }
                });
            }
        }
    }

    let trait_doc = format!("Instrumented methods of [`{}`] topics.", quote!(#self_ty));
    Ok(quote! {
        #item

        #[doc = #trait_doc]
        #vis trait #trait_ident {
            #(#decls)*
        }

        impl #trait_ident for observa::Topic<#self_ty> {
            #(#impls)*
        }
    })
}
