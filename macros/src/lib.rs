use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, ItemFn, LitInt};

/// Registers a function as the handler of a guest kernel syscall.
///
/// This attribute macro:
/// 1. Leaves the handler function itself untouched
/// 2. Registers the mapping `number -> handler` in the syscall table
///
/// The handler must have the signature
/// `unsafe fn(&Process, &SyscallArgs) -> Status`.
///
/// # Example
///
/// ```ignore
/// #[syscall(593)]
/// unsafe fn dynlib_get_info(process: &Process, args: &SyscallArgs) -> Status {
///     // implementation
/// }
/// ```
///
/// Expands to:
///
/// ```ignore
/// unsafe fn dynlib_get_info(process: &Process, args: &SyscallArgs) -> Status {
///     // implementation
/// }
///
/// #[linkme::distributed_slice(crate::syscalls::SYSCALLS)]
/// static _SYSCALL_DYNLIB_GET_INFO: crate::syscalls::SyscallEntry =
///     crate::syscalls::SyscallEntry {
///         number: 593,
///         name: "dynlib_get_info",
///         handler: dynlib_get_info,
///     };
/// ```
#[proc_macro_attribute]
pub fn syscall(attr: TokenStream, item: TokenStream) -> TokenStream {
    let number = parse_macro_input!(attr as LitInt);
    let input = parse_macro_input!(item as ItemFn);

    let handler = &input.sig.ident;
    let name = handler.to_string();
    let static_name = format_ident!("_SYSCALL_{}", name.to_uppercase());

    let expanded = quote! {
        #input

        #[linkme::distributed_slice(crate::syscalls::SYSCALLS)]
        static #static_name: crate::syscalls::SyscallEntry = crate::syscalls::SyscallEntry {
            number: #number,
            name: #name,
            handler: #handler,
        };
    };

    TokenStream::from(expanded)
}
