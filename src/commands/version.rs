pub fn run() {
    println!("kube-chaos {}", env!("CARGO_PKG_VERSION"));
}
