use proc_macro::TokenStream;
use proc_macro2::Ident;
use quote::quote;
#[cfg(not(test))]
use std::env;
#[cfg(not(test))]
use std::fs::OpenOptions;
#[cfg(not(test))]
use std::io::Write;

/// Dumps the expansion under `target/macros/<dir_name>/` for inspection. Skipped in the crate's own test builds.
pub fn write_to_local_file(lines: Vec<String>, dir_name: &str, file_name: &str) {
    #[cfg(test)]
    let _ = (lines, dir_name, file_name);

    #[cfg(not(test))]
    {
        let dir_path = match env::current_dir() {
            Ok(dir) => dir.join("target").join("macros").join(dir_name),
            Err(e) => {
                eprintln!("Current dir inaccessible: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::create_dir_all(&dir_path) {
            eprintln!("Failed to create directory {:?}: {}", dir_path, e);
            return;
        }
        let full_path = dir_path.join(file_name);

        if let Err(e) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&full_path)
            .and_then(|mut file| file.write_all(lines.join("\n").as_bytes()))
        {
            eprintln!("Failed to write to {:?}: {}", full_path, e);
        }
    }
}

pub fn submit_struct_to_stream(stream: proc_macro2::TokenStream, dir: &str, struct_ident: &Ident, suffix: &str) -> TokenStream {
    let formatted_token_stream = match syn::parse2::<syn::File>(stream.clone()) {
        Ok(ast) => prettyplease::unparse(&ast),
        Err(_) => stream.to_string(),
    };

    write_to_local_file(vec![formatted_token_stream], dir, &format!("{}{}", struct_ident, suffix));

    quote! {
        #stream
    }
    .into()
}
