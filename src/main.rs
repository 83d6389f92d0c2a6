#![allow(non_snake_case)]
use RustedIVP::Examples::ivp_examples::ivp_examples;

fn main() {
    let example = 2;
    match example {
        0..=7 => ivp_examples(example),
        _ => println!("example {} does not exist", example),
    }
}
